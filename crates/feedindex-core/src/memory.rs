//! In-memory feed log.
//!
//! Implements [`FeedLog`] and [`Feed`] entirely in RAM. Useful for tests,
//! demos, and embedding the indexer in front of data that already lives in
//! memory. Records can be announced before their payload is available, which
//! mimics a replicated log whose entries are still downloading.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, watch};

use crate::error::IndexerError;
use crate::feed::{Feed, FeedEvent, FeedLog};
use crate::types::FeedKey;

const EVENT_CAPACITY: usize = 1_024;

// ─── MemoryFeed ──────────────────────────────────────────────────────────────

/// An append-only feed held in memory.
pub struct MemoryFeed {
    key: FeedKey,
    /// `None` marks a record whose payload has not arrived yet.
    records: Mutex<Vec<Option<Bytes>>>,
    events: broadcast::Sender<FeedEvent>,
    opened: watch::Sender<bool>,
}

impl MemoryFeed {
    /// Create a feed that is ready immediately.
    pub fn new(key: FeedKey) -> Self {
        Self::with_ready(key, true)
    }

    /// Create a feed that stays unopened until [`MemoryFeed::open`] is called.
    pub fn unopened(key: FeedKey) -> Self {
        Self::with_ready(key, false)
    }

    fn with_ready(key: FeedKey, ready: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (opened, _) = watch::channel(ready);
        Self {
            key,
            records: Mutex::new(Vec::new()),
            events,
            opened,
        }
    }

    /// Mark the feed as opened, releasing everyone waiting in `ready()`.
    pub fn open(&self) {
        self.opened.send_replace(true);
    }

    /// Append a record and return its sequence number.
    pub fn append(&self, value: impl Into<Bytes>) -> u64 {
        let seq = {
            let mut records = self.records.lock().unwrap();
            records.push(Some(value.into()));
            records.len() as u64 - 1
        };
        let _ = self.events.send(FeedEvent::Append);
        seq
    }

    /// Append several records at once, emitting a single append event.
    pub fn extend<I, V>(&self, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        self.records
            .lock()
            .unwrap()
            .extend(values.into_iter().map(|v| Some(v.into())));
        let _ = self.events.send(FeedEvent::Append);
    }

    /// Grow the feed by `count` records whose payloads are not available yet.
    pub fn announce(&self, count: u64) {
        {
            let mut records = self.records.lock().unwrap();
            let len = records.len() + count as usize;
            records.resize(len, None);
        }
        let _ = self.events.send(FeedEvent::Append);
    }

    /// Supply the payload of a previously announced record.
    pub fn download(&self, seq: u64, value: impl Into<Bytes>) -> Result<(), IndexerError> {
        {
            let mut records = self.records.lock().unwrap();
            let slot = records.get_mut(seq as usize).ok_or_else(|| IndexerError::Feed {
                feed: self.key.short(),
                reason: format!("no record {seq} to download"),
            })?;
            *slot = Some(value.into());
        }
        let _ = self.events.send(FeedEvent::Download);
        Ok(())
    }
}

#[async_trait]
impl Feed for MemoryFeed {
    fn key(&self) -> FeedKey {
        self.key
    }

    fn len(&self) -> u64 {
        self.records.lock().unwrap().len() as u64
    }

    async fn ready(&self) {
        let mut rx = self.opened.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|opened| *opened).await;
    }

    async fn get(&self, seq: u64) -> Result<Option<Bytes>, IndexerError> {
        let records = self.records.lock().unwrap();
        match records.get(seq as usize) {
            Some(slot) => Ok(slot.clone()),
            None => Err(IndexerError::Feed {
                feed: self.key.short(),
                reason: format!("record {seq} out of range (len {})", records.len()),
            }),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }
}

// ─── MemoryLog ───────────────────────────────────────────────────────────────

/// A growing collection of [`MemoryFeed`]s.
pub struct MemoryLog {
    feeds: Mutex<Vec<Arc<MemoryFeed>>>,
    discovered: broadcast::Sender<Arc<dyn Feed>>,
    opened: watch::Sender<bool>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    /// Create an empty log that is ready immediately.
    pub fn new() -> Self {
        Self::with_ready(true)
    }

    /// Create an empty log that stays unopened until [`MemoryLog::open`].
    pub fn unopened() -> Self {
        Self::with_ready(false)
    }

    fn with_ready(ready: bool) -> Self {
        let (discovered, _) = broadcast::channel(EVENT_CAPACITY);
        let (opened, _) = watch::channel(ready);
        Self {
            feeds: Mutex::new(Vec::new()),
            discovered,
            opened,
        }
    }

    pub fn open(&self) {
        self.opened.send_replace(true);
    }

    /// Create a new, already opened feed and announce it to subscribers.
    pub fn add_feed(&self, key: FeedKey) -> Arc<MemoryFeed> {
        self.insert(Arc::new(MemoryFeed::new(key)))
    }

    /// Add an existing feed and announce it to subscribers.
    pub fn insert(&self, feed: Arc<MemoryFeed>) -> Arc<MemoryFeed> {
        self.feeds.lock().unwrap().push(feed.clone());
        let _ = self.discovered.send(feed.clone() as Arc<dyn Feed>);
        feed
    }

    /// Look up a feed by key.
    pub fn feed(&self, key: &FeedKey) -> Option<Arc<MemoryFeed>> {
        self.feeds
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.key == *key)
            .cloned()
    }
}

#[async_trait]
impl FeedLog for MemoryLog {
    async fn ready(&self) {
        let mut rx = self.opened.subscribe();
        let _ = rx.wait_for(|opened| *opened).await;
    }

    fn feeds(&self) -> Vec<Arc<dyn Feed>> {
        self.feeds
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.clone() as Arc<dyn Feed>)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<dyn Feed>> {
        self.discovered.subscribe()
    }
}

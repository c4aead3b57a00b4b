//! Feed and log collaborator traits, plus the registry of known feeds.
//!
//! A [`FeedLog`] is a dynamically growing collection of append-only
//! [`Feed`]s. The indexer never writes to feeds; it only reads records,
//! watches for growth, and listens for newly discovered feeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::IndexerError;
use crate::types::FeedKey;

/// Change notifications emitted by a single feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// New records were appended to the feed.
    Append,
    /// Previously missing records became locally available.
    Download,
}

/// An append-only, ordered sequence of immutable records.
#[async_trait]
pub trait Feed: Send + Sync {
    /// Stable identity of the feed.
    fn key(&self) -> FeedKey;

    /// Number of records the feed currently knows about. Some of them may
    /// not be locally available yet.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once the feed has finished opening.
    async fn ready(&self);

    /// Read record `seq` without waiting for it to arrive.
    ///
    /// Returns `Ok(None)` when the record is not locally available yet.
    async fn get(&self, seq: u64) -> Result<Option<Bytes>, IndexerError>;

    /// Subscribe to append / download notifications.
    fn subscribe(&self) -> broadcast::Receiver<FeedEvent>;
}

/// A collection of feeds that grows as feeds are discovered.
#[async_trait]
pub trait FeedLog: Send + Sync {
    /// Resolves once the log has finished opening.
    async fn ready(&self);

    /// All feeds currently known to the log.
    fn feeds(&self) -> Vec<Arc<dyn Feed>>;

    /// Subscribe to feed discovery. Each message is a newly added feed.
    fn subscribe(&self) -> broadcast::Receiver<Arc<dyn Feed>>;
}

// ─── FeedRegistry ────────────────────────────────────────────────────────────

/// Append-only, key-addressed set of the feeds an indexer has seen.
///
/// Feeds are only ever added; a feed that disappears from the log keeps its
/// entry.
#[derive(Default, Clone)]
pub struct FeedRegistry {
    feeds: BTreeMap<FeedKey, Arc<dyn Feed>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `feed` unless a feed with the same key is already known.
    /// Returns `true` if the feed is new.
    pub fn insert(&mut self, feed: Arc<dyn Feed>) -> bool {
        let key = feed.key();
        if self.feeds.contains_key(&key) {
            return false;
        }
        self.feeds.insert(key, feed);
        true
    }

    /// Merge every feed of `log` into the registry.
    pub fn refresh(&mut self, log: &dyn FeedLog) {
        for feed in log.feeds() {
            self.insert(feed);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Feed>> {
        self.feeds.values()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

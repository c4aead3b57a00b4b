//! The indexing scheduler: startup and the pass loop.
//!
//! # Startup
//! Wait for the log to open, fetch the persisted snapshot, and clear the
//! index if the snapshot was written by a different indexing version. Any
//! failure here is reported once and the indexer never becomes ready.
//!
//! # Passes
//! A pass visits every known feed concurrently. For each feed it reads at
//! most `max_batch_size` unread records without waiting for missing ones,
//! hands the available prefix to the sink, then advances and persists the
//! cursor. A pass that delivered anything is followed by another pass
//! straight away; a pass that found nothing makes the indexer ready.
//!
//! # Triggers
//! Feed readiness, appends, downloads, and feed discovery all arrive as
//! triggers on one channel. Triggers queued before a pass starts are
//! absorbed by it, since each pass re-reads feed lengths; triggers that
//! arrive during a pass cause at most one more pass.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cursor::{Cursor, CursorMap};
use crate::error::IndexerError;
use crate::feed::{Feed, FeedEvent, FeedLog, FeedRegistry};
use crate::indexer::{FailureSlot, IndexerConfig, IndexerEvent, IndexerStatus, StatusWatch};
use crate::sink::IndexSink;
use crate::snapshot::IndexSnapshot;
use crate::store::{IndexClearer, SnapshotStore};
use crate::types::{BatchRecord, FeedKey};

/// A request to run a pass, tagged with what caused it.
pub(crate) enum Trigger {
    /// A discovered feed finished opening.
    FeedReady(Arc<dyn Feed>),
    /// A wired feed emitted an event.
    Feed(FeedKey, FeedEvent),
    /// Discovery notifications were dropped; re-list the log.
    Rescan,
}

impl Trigger {
    fn describe(&self) -> String {
        match self {
            Self::FeedReady(feed) => format!("feed {} ready", feed.key().short()),
            Self::Feed(key, FeedEvent::Append) => format!("append on {}", key.short()),
            Self::Feed(key, FeedEvent::Download) => format!("download on {}", key.short()),
            Self::Rescan => "rescan".into(),
        }
    }
}

/// In-memory cursor state of the scheduler.
#[derive(Debug)]
enum CursorState {
    /// Nothing read yet; the first pass loads the persisted snapshot.
    Unloaded,
    /// The index was just wiped; the first pass starts from zero.
    Cleared,
    Loaded(CursorMap),
}

/// Collaborators and channels handed to the scheduler by the builder.
pub(crate) struct SchedulerParts {
    pub config: IndexerConfig,
    pub log: Arc<dyn FeedLog>,
    pub sink: Arc<dyn IndexSink>,
    pub snapshots: SnapshotStore,
    pub clearer: Option<Arc<dyn IndexClearer>>,
    pub status: watch::Sender<StatusWatch>,
    pub events: broadcast::Sender<IndexerEvent>,
    pub failure: FailureSlot,
    pub discovered: broadcast::Receiver<Arc<dyn Feed>>,
}

/// Owns the cursor state and drives passes. Runs as a single task.
pub(crate) struct Scheduler {
    config: IndexerConfig,
    log: Arc<dyn FeedLog>,
    sink: Arc<dyn IndexSink>,
    snapshots: SnapshotStore,
    clearer: Option<Arc<dyn IndexClearer>>,
    registry: FeedRegistry,
    wired: HashSet<FeedKey>,
    cursors: CursorState,
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    triggers: mpsc::UnboundedReceiver<Trigger>,
    status: watch::Sender<StatusWatch>,
    events: broadcast::Sender<IndexerEvent>,
    failure: FailureSlot,
    /// Feed and discovery watchers; aborted when the scheduler is dropped.
    watchers: JoinSet<()>,
}

impl Scheduler {
    /// Build the scheduler and start listening for feed discovery.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn new(parts: SchedulerParts) -> Self {
        let (trigger_tx, triggers) = mpsc::unbounded_channel();
        let mut watchers = JoinSet::new();
        watchers.spawn(watch_discovery(parts.discovered, trigger_tx.clone()));

        Self {
            config: parts.config,
            log: parts.log,
            sink: parts.sink,
            snapshots: parts.snapshots,
            clearer: parts.clearer,
            registry: FeedRegistry::new(),
            wired: HashSet::new(),
            cursors: CursorState::Unloaded,
            trigger_tx,
            triggers,
            status: parts.status,
            events: parts.events,
            failure: parts.failure,
            watchers,
        }
    }

    /// Run until the indexer is dropped or halts on an error.
    pub(crate) async fn run(mut self) {
        if let Err(err) = self.startup().await {
            self.halt(err);
            return;
        }

        if let Err(err) = self.request_run().await {
            self.halt(err);
            return;
        }

        while let Some(trigger) = self.triggers.recv().await {
            debug!(trigger = %trigger.describe(), "run requested");
            self.absorb(trigger);
            if let Err(err) = self.request_run().await {
                self.halt(err);
                return;
            }
        }
    }

    // ─── Startup ─────────────────────────────────────────────────────────────

    async fn startup(&mut self) -> Result<(), IndexerError> {
        self.log.ready().await;

        let raw = match self.snapshots.fetch_raw().await? {
            Some(raw) => raw,
            None => {
                info!(version = self.config.version, "no persisted snapshot; starting fresh");
                return Ok(());
            }
        };
        let snapshot = IndexSnapshot::decode(&raw)?;

        if snapshot.version == self.config.version {
            info!(
                version = snapshot.version,
                feeds = snapshot.cursors.len(),
                "resuming from persisted snapshot"
            );
            return Ok(());
        }

        match &self.clearer {
            Some(clearer) => {
                warn!(
                    stored = snapshot.version,
                    configured = self.config.version,
                    "index version changed; clearing index"
                );
                clearer.clear().await.map_err(|e| match e {
                    IndexerError::Clear(_) => e,
                    other => IndexerError::Clear(other.to_string()),
                })?;
                self.snapshots
                    .save(&IndexSnapshot::new(self.config.version))
                    .await?;
                self.cursors = CursorState::Cleared;
            }
            None => {
                warn!(
                    stored = snapshot.version,
                    configured = self.config.version,
                    "index version changed but no index clearer is set; keeping index"
                );
            }
        }
        Ok(())
    }

    // ─── Triggers ────────────────────────────────────────────────────────────

    /// Apply the side effects of a trigger (feed registration and wiring).
    fn absorb(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::FeedReady(feed) => {
                if self.registry.insert(feed.clone()) {
                    info!(feed = %feed.key().short(), "feed discovered");
                }
                self.wire(feed);
            }
            Trigger::Rescan => {
                self.registry.refresh(self.log.as_ref());
                let feeds: Vec<_> = self.registry.iter().cloned().collect();
                for feed in feeds {
                    self.wire(feed);
                }
            }
            Trigger::Feed(..) => {}
        }
    }

    /// Absorb every trigger already queued; the next pass covers them.
    fn drain_triggers(&mut self) {
        while let Ok(trigger) = self.triggers.try_recv() {
            debug!(trigger = %trigger.describe(), "trigger absorbed by pass");
            self.absorb(trigger);
        }
    }

    /// Forward append / download events of `feed` as triggers. Wiring the
    /// same feed twice is a no-op.
    fn wire(&mut self, feed: Arc<dyn Feed>) {
        let key = feed.key();
        if !self.wired.insert(key) {
            return;
        }
        let mut rx = feed.subscribe();
        let tx = self.trigger_tx.clone();
        self.watchers.spawn(async move {
            loop {
                let trigger = match rx.recv().await {
                    Ok(event) => Trigger::Feed(key, event),
                    // Missed events only mean missed wakeups; one is enough.
                    Err(RecvError::Lagged(_)) => Trigger::Feed(key, FeedEvent::Append),
                    Err(RecvError::Closed) => break,
                };
                if tx.send(trigger).is_err() {
                    break;
                }
            }
        });
    }

    // ─── Passes ──────────────────────────────────────────────────────────────

    /// Run passes until one finds no work, then become ready.
    ///
    /// Only the scheduler task calls this, so runs never overlap.
    async fn request_run(&mut self) -> Result<(), IndexerError> {
        self.set_status(IndexerStatus::Indexing);

        let mut passes = 0u32;
        loop {
            self.drain_triggers();
            passes += 1;
            if !self.pass().await? {
                break;
            }
        }

        self.set_status(IndexerStatus::Ready);
        debug!(passes, feeds = self.registry.len(), "indexer ready");
        let _ = self.events.send(IndexerEvent::Ready);
        Ok(())
    }

    /// Load the cursor map on first use and wire every known feed.
    async fn load_cursors(&mut self) -> Result<CursorMap, IndexerError> {
        let map = match std::mem::replace(&mut self.cursors, CursorState::Unloaded) {
            CursorState::Loaded(map) => return Ok(map),
            CursorState::Cleared => CursorMap::new(),
            CursorState::Unloaded => self
                .snapshots
                .load()
                .await?
                .map(|snapshot| snapshot.cursors)
                .unwrap_or_default(),
        };

        let feeds: Vec<_> = self.registry.iter().cloned().collect();
        for feed in feeds {
            self.wire(feed);
        }
        Ok(map)
    }

    /// One sweep over every known feed. Returns `true` if any feed
    /// delivered records to the sink.
    async fn pass(&mut self) -> Result<bool, IndexerError> {
        self.registry.refresh(self.log.as_ref());
        let mut cursors = self.load_cursors().await?;

        let max_batch = self.config.max_batch_size;
        let mut plan = Vec::new();
        for feed in self.registry.iter() {
            let key = feed.key();
            let cursor = cursors.entry(key).or_insert_with(|| Cursor::new(key));
            let range = cursor.unread(feed.len(), max_batch);
            if !range.is_empty() {
                plan.push((feed.clone(), range));
            }
        }

        let pass = Pass {
            version: self.config.version,
            sink: self.sink.as_ref(),
            snapshots: &self.snapshots,
            events: &self.events,
            cursors: Mutex::new(cursors),
            persist: tokio::sync::Mutex::new(()),
        };
        let results = join_all(
            plan.iter()
                .map(|(feed, range)| pass.index_feed(feed.as_ref(), range.clone())),
        )
        .await;

        let Pass { cursors, .. } = pass;
        self.cursors = CursorState::Loaded(cursors.into_inner().unwrap());

        let mut did_work = false;
        for result in results {
            did_work |= result?;
        }
        Ok(did_work)
    }

    // ─── Status ──────────────────────────────────────────────────────────────

    fn set_status(&self, status: IndexerStatus) {
        self.status.send_modify(|s| {
            if status == IndexerStatus::Ready && s.status != IndexerStatus::Ready {
                s.ready_epoch += 1;
            }
            s.status = status;
        });
    }

    /// Report a fatal error and stop. Status stays `Indexing` for good.
    fn halt(&self, err: IndexerError) {
        error!(error = %err, "indexer stopped");
        let err = Arc::new(err);
        *self.failure.lock().unwrap() = Some(err.clone());
        self.status.send_modify(|s| {
            s.status = IndexerStatus::Indexing;
            s.halted = true;
        });
        let _ = self.events.send(IndexerEvent::Error(err));
    }
}

// ─── Pass ────────────────────────────────────────────────────────────────────

/// State shared by the per-feed tasks of one pass.
struct Pass<'a> {
    version: u32,
    sink: &'a dyn IndexSink,
    snapshots: &'a SnapshotStore,
    events: &'a broadcast::Sender<IndexerEvent>,
    cursors: Mutex<CursorMap>,
    /// Serializes snapshot writes so a stale snapshot never lands last.
    persist: tokio::sync::Mutex<()>,
}

impl Pass<'_> {
    /// Fetch, sink, and persist one batch of `feed`. Returns `true` if any
    /// record was delivered.
    async fn index_feed(&self, feed: &dyn Feed, range: Range<u64>) -> Result<bool, IndexerError> {
        let key = feed.key();
        let fetched = join_all(range.clone().map(|seq| feed.get(seq))).await;

        let mut batch = Vec::with_capacity(fetched.len());
        for (seq, result) in range.clone().zip(fetched) {
            match result {
                Ok(Some(value)) => batch.push(BatchRecord {
                    feed_key: key,
                    seq,
                    value,
                }),
                Ok(None) => {
                    debug!(feed = %key.short(), seq, "record not available yet; truncating batch");
                    break;
                }
                Err(err) => {
                    debug!(feed = %key.short(), seq, error = %err, "record fetch failed; truncating batch");
                    break;
                }
            }
        }
        if batch.is_empty() {
            return Ok(false);
        }

        self.sink.apply(&batch).await?;

        let delivered = batch.len() as u64;
        {
            let _guard = self.persist.lock().await;
            let snapshot = {
                let mut cursors = self.cursors.lock().unwrap();
                cursors
                    .entry(key)
                    .or_insert_with(|| Cursor::new(key))
                    .advance(delivered);
                IndexSnapshot {
                    version: self.version,
                    cursors: cursors.clone(),
                }
            };
            self.snapshots.save(&snapshot).await?;
        }

        debug!(
            feed = %key.short(),
            from = range.start,
            delivered,
            "batch indexed"
        );
        let _ = self.events.send(IndexerEvent::Indexed(batch.into()));
        Ok(true)
    }
}

// ─── Discovery ───────────────────────────────────────────────────────────────

/// Turn feed discovery into `FeedReady` triggers, once each feed has opened.
async fn watch_discovery(
    mut discovered: broadcast::Receiver<Arc<dyn Feed>>,
    tx: mpsc::UnboundedSender<Trigger>,
) {
    let mut opening: JoinSet<Arc<dyn Feed>> = JoinSet::new();
    let mut closed = false;
    while !(closed && opening.is_empty()) {
        tokio::select! {
            msg = discovered.recv(), if !closed => match msg {
                Ok(feed) => {
                    opening.spawn(async move {
                        feed.ready().await;
                        feed
                    });
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "feed discovery lagged; rescanning log");
                    if tx.send(Trigger::Rescan).is_err() {
                        return;
                    }
                }
                Err(RecvError::Closed) => closed = true,
            },
            Some(opened) = opening.join_next(), if !opening.is_empty() => {
                if let Ok(feed) = opened {
                    if tx.send(Trigger::FeedReady(feed)).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

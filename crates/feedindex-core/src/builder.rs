//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedindex_core::builder::IndexerBuilder;
//! use feedindex_core::memory::MemoryLog;
//! use feedindex_core::sink::FnSink;
//!
//! # async fn example() -> Result<(), feedindex_core::IndexerError> {
//! let log = Arc::new(MemoryLog::new());
//! let sink = Arc::new(FnSink::new(|batch| async move {
//!     println!("{} records", batch.len());
//!     Ok(())
//! }));
//!
//! let indexer = IndexerBuilder::new(log, sink)
//!     .version(2)
//!     .max_batch_size(100)
//!     .build()?;
//! indexer.ready().await.ok();
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};

use crate::error::IndexerError;
use crate::feed::FeedLog;
use crate::indexer::{Indexer, IndexerConfig, IndexerEvent, StatusWatch};
use crate::scheduler::{Scheduler, SchedulerParts};
use crate::sink::IndexSink;
use crate::store::{CursorStore, IndexClearer, MemoryCursorStore, SnapshotStore};

/// Fluent builder for [`Indexer`].
pub struct IndexerBuilder {
    log: Arc<dyn FeedLog>,
    sink: Arc<dyn IndexSink>,
    config: IndexerConfig,
    store: Option<Arc<dyn CursorStore>>,
    clearer: Option<Arc<dyn IndexClearer>>,
    events: Option<broadcast::Sender<IndexerEvent>>,
}

impl IndexerBuilder {
    /// Start a builder for indexing `log` into `sink`.
    pub fn new(log: Arc<dyn FeedLog>, sink: Arc<dyn IndexSink>) -> Self {
        Self {
            log,
            sink,
            config: IndexerConfig::default(),
            store: None,
            clearer: None,
            events: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the indexing logic version.
    pub fn version(mut self, version: u32) -> Self {
        self.config.version = version;
        self
    }

    /// Set the maximum number of records per feed per sink call.
    pub fn max_batch_size(mut self, size: u64) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Set the notification channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Persist cursor state in `store` instead of in memory.
    pub fn store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Clear the derived index with `clearer` when the version changes.
    pub fn clear_index(mut self, clearer: Arc<dyn IndexClearer>) -> Self {
        self.clearer = Some(clearer);
        self
    }

    /// Subscribe to notifications before the indexer starts.
    ///
    /// Receivers obtained here see every notification, including a startup
    /// `Error` and the first `Ready`, which may be sent before `build()`
    /// returns. The channel is created by the first call, so set
    /// `event_capacity` before subscribing.
    pub fn subscribe(&mut self) -> broadcast::Receiver<IndexerEvent> {
        let capacity = self.config.event_capacity.max(1);
        self.events
            .get_or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Validate the configuration and start the indexer.
    ///
    /// Must be called from within a Tokio runtime. Without a store, cursor
    /// state is kept in memory; if no clearer is set either, the in-memory
    /// store also clears itself on version changes.
    pub fn build(self) -> Result<Indexer, IndexerError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            IndexerError::Config("indexer must be built inside a Tokio runtime".into())
        })?;

        let (store, clearer) = match (self.store, self.clearer) {
            (Some(store), clearer) => (store, clearer),
            (None, Some(clearer)) => {
                (Arc::new(MemoryCursorStore::new()) as Arc<dyn CursorStore>, Some(clearer))
            }
            (None, None) => {
                let memory = Arc::new(MemoryCursorStore::new());
                (
                    memory.clone() as Arc<dyn CursorStore>,
                    Some(memory as Arc<dyn IndexClearer>),
                )
            }
        };

        let (status_tx, status_rx) = watch::channel(StatusWatch::starting());
        let events = match self.events {
            Some(events) => events,
            None => broadcast::channel(self.config.event_capacity).0,
        };
        let failure = Arc::new(Mutex::new(None));

        // Subscribe before anything runs so no discovered feed is missed.
        let discovered = self.log.subscribe();

        let scheduler = Scheduler::new(SchedulerParts {
            config: self.config.clone(),
            log: self.log,
            sink: self.sink,
            snapshots: SnapshotStore::new(store),
            clearer,
            status: status_tx,
            events: events.clone(),
            failure: failure.clone(),
            discovered,
        });
        let task = runtime.spawn(scheduler.run());

        Ok(Indexer::new(self.config, status_rx, events, failure, task))
    }
}

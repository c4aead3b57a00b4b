//! Indexer configuration, status, notifications, and the running handle.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::IndexerError;
use crate::types::BatchRecord;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Version of the indexing logic. When it differs from the version of
    /// the persisted snapshot, the index is cleared (if a clearer is set).
    #[serde(default = "default_version")]
    pub version: u32,
    /// Maximum number of records handed to the sink per feed per pass.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u64,
    /// Capacity of the notification channel. Slow subscribers that fall
    /// further behind than this observe a lag error.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_version() -> u32 { 1 }
fn default_max_batch_size() -> u64 { 50 }
fn default_event_capacity() -> usize { 1_024 }

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            max_batch_size: default_max_batch_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl IndexerConfig {
    /// Check the knobs before an indexer is started.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.max_batch_size == 0 {
            return Err(IndexerError::Config("max_batch_size must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(IndexerError::Config("event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runtime status of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerStatus {
    /// Starting up, or a pass is in flight.
    Indexing,
    /// Every known feed is drained; waiting for new records.
    Ready,
}

impl std::fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexing => write!(f, "indexing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Notifications published by a running indexer.
#[derive(Debug, Clone)]
pub enum IndexerEvent {
    /// A pass finished without finding unread records.
    Ready,
    /// A batch was applied by the sink and its cursor persisted.
    Indexed(Arc<[BatchRecord]>),
    /// The indexer hit an unrecoverable error and stopped.
    Error(Arc<IndexerError>),
}

/// Status as published by the scheduler.
///
/// `ready_epoch` counts transitions into [`IndexerStatus::Ready`], so a
/// waiter cannot miss a short-lived ready period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatusWatch {
    pub status: IndexerStatus,
    pub ready_epoch: u64,
    pub halted: bool,
}

impl StatusWatch {
    pub(crate) fn starting() -> Self {
        Self {
            status: IndexerStatus::Indexing,
            ready_epoch: 0,
            halted: false,
        }
    }
}

/// Slot holding the error that halted the indexer, if any.
pub(crate) type FailureSlot = Arc<Mutex<Option<Arc<IndexerError>>>>;

// ─── Indexer ─────────────────────────────────────────────────────────────────

/// Handle to a running indexer.
///
/// Created by [`crate::builder::IndexerBuilder::build`]. Dropping the handle
/// stops the indexer and all of its feed watchers.
pub struct Indexer {
    config: IndexerConfig,
    status: watch::Receiver<StatusWatch>,
    events: broadcast::Sender<IndexerEvent>,
    failure: FailureSlot,
    task: JoinHandle<()>,
}

impl Indexer {
    pub(crate) fn new(
        config: IndexerConfig,
        status: watch::Receiver<StatusWatch>,
        events: broadcast::Sender<IndexerEvent>,
        failure: FailureSlot,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            config,
            status,
            events,
            failure,
            task,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> IndexerStatus {
        self.status.borrow().status
    }

    /// Subscribe to `Ready` / `Indexed` / `Error` notifications sent from
    /// now on.
    ///
    /// The indexer may already be running when this is called; use
    /// [`crate::builder::IndexerBuilder::subscribe`] to also see the
    /// notifications of startup and the first run.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.events.subscribe()
    }

    /// The error that stopped the indexer, if it stopped.
    pub fn failure(&self) -> Option<Arc<IndexerError>> {
        self.failure.lock().unwrap().clone()
    }

    /// Wait until the indexer is ready.
    ///
    /// Returns after yielding once if the indexer is ready now; otherwise
    /// the next time it becomes ready. Fails if the indexer stopped on an
    /// error before getting there.
    pub async fn ready(&self) -> Result<(), Arc<IndexerError>> {
        wait_ready(self.status.clone(), &self.failure).await
    }

    /// Run `f` once the indexer is ready, on a separate task.
    ///
    /// `f` is never called from inside this method, and is not called at
    /// all if the indexer stops on an error first.
    pub fn on_ready<F>(&self, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let status = self.status.clone();
        let failure = self.failure.clone();
        tokio::spawn(async move {
            if wait_ready(status, &failure).await.is_ok() {
                f();
            }
        })
    }
}

async fn wait_ready(
    mut rx: watch::Receiver<StatusWatch>,
    failure: &FailureSlot,
) -> Result<(), Arc<IndexerError>> {
    let seen = *rx.borrow_and_update();
    if seen.status == IndexerStatus::Ready {
        tokio::task::yield_now().await;
        return Ok(());
    }
    if !seen.halted {
        let reached = rx
            .wait_for(|s| s.ready_epoch > seen.ready_epoch || s.halted)
            .await
            .map(|s| s.ready_epoch > seen.ready_epoch);
        if let Ok(true) = reached {
            return Ok(());
        }
    }
    let failure = failure.lock().unwrap().clone();
    Err(failure.unwrap_or_else(|| Arc::new(IndexerError::Other("indexer stopped".into()))))
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

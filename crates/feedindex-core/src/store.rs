//! Cursor store — persists the indexer's snapshot for crash recovery.
//!
//! The engine hands the store an opaque blob (an encoded [`IndexSnapshot`])
//! after every batch the sink has finished. On restart the blob is fetched
//! back and indexing resumes from the recorded cursors.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::snapshot::IndexSnapshot;

/// Trait for fetching and storing the encoded snapshot.
///
/// Implementations include [`MemoryCursorStore`] and the file and SQLite
/// stores of `feedindex-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Fetch the last stored blob, or `None` if nothing was stored yet.
    async fn fetch(&self) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Store (replace) the blob.
    async fn store(&self, state: Vec<u8>) -> Result<(), IndexerError>;
}

/// Wipes the derived index when the indexing logic's version changes.
#[async_trait]
pub trait IndexClearer: Send + Sync {
    async fn clear(&self) -> Result<(), IndexerError>;
}

/// Encodes and decodes snapshots on top of a [`CursorStore`].
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn CursorStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self { store }
    }

    /// Load and decode the saved snapshot (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<IndexSnapshot>, IndexerError> {
        match self.store.fetch().await? {
            Some(bytes) => IndexSnapshot::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Encode and save a full snapshot.
    pub async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), IndexerError> {
        self.store.store(snapshot.encode()?).await
    }

    /// Fetch the raw blob without decoding it.
    pub async fn fetch_raw(&self) -> Result<Option<Vec<u8>>, IndexerError> {
        self.store.fetch().await
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-process cursor store, used when no persistent store is configured.
///
/// State is lost when the process exits. Clearing the index drops the
/// stored blob, so the next run starts from an empty slate.
#[derive(Default)]
pub struct MemoryCursorStore {
    state: Mutex<Option<Vec<u8>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `state`.
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Returns `true` if a blob is currently stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().is_none()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn store(&self, state: Vec<u8>) -> Result<(), IndexerError> {
        *self.state.lock().unwrap() = Some(state);
        Ok(())
    }
}

#[async_trait]
impl IndexClearer for MemoryCursorStore {
    async fn clear(&self) -> Result<(), IndexerError> {
        self.state.lock().unwrap().take();
        Ok(())
    }
}

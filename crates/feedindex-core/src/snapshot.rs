//! Index snapshot and its byte codec.
//!
//! A snapshot is the complete persisted state of an indexer: the version of
//! the indexing logic that produced the index, and one cursor per feed. It is
//! always written as a whole, never patched field by field.
//!
//! The encoding is a JSON document with the cursor map keyed by hex feed key:
//!
//! ```text
//! {"version":2,"cursors":{"ab…":{"key":"ab…","read_up_to":50}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorMap};
use crate::error::IndexerError;
use crate::types::FeedKey;

/// Persisted indexer state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Version of the indexing logic that produced this state.
    pub version: u32,
    /// Read position of every known feed.
    pub cursors: CursorMap,
}

impl IndexSnapshot {
    /// An empty snapshot for the given version.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            cursors: CursorMap::new(),
        }
    }

    /// Cursor for `key`, if the feed is known.
    pub fn cursor(&self, key: &FeedKey) -> Option<&Cursor> {
        self.cursors.get(key)
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, IndexerError> {
        serde_json::to_vec(self).map_err(|e| IndexerError::Other(e.to_string()))
    }

    /// Decode from bytes.
    ///
    /// Fails with [`IndexerError::Decode`] on malformed input, including a
    /// map entry whose name does not match the key of the cursor it holds.
    pub fn decode(bytes: &[u8]) -> Result<Self, IndexerError> {
        let snapshot: IndexSnapshot = serde_json::from_slice(bytes)?;
        for (key, cursor) in &snapshot.cursors {
            if *key != cursor.key {
                return Err(IndexerError::Decode(format!(
                    "cursor entry {key} holds key {}",
                    cursor.key
                )));
            }
        }
        Ok(snapshot)
    }
}

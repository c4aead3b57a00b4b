//! Per-feed read cursor.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::types::FeedKey;

/// How far the indexer has read into one feed.
///
/// `read_up_to` counts the records already delivered to the sink, starting
/// from record 0. It only ever grows, and never exceeds the feed's length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// The feed this cursor belongs to.
    pub key: FeedKey,
    /// Number of records already delivered to the sink.
    pub read_up_to: u64,
}

/// Cursors of all known feeds, addressed by feed key.
pub type CursorMap = BTreeMap<FeedKey, Cursor>;

impl Cursor {
    /// A cursor that has not read anything yet.
    pub fn new(key: FeedKey) -> Self {
        Self { key, read_up_to: 0 }
    }

    /// Record that `delivered` more records were handed to the sink.
    pub fn advance(&mut self, delivered: u64) {
        self.read_up_to += delivered;
    }

    /// The next range of sequence numbers to read, capped at `max_batch`
    /// records. Empty when the feed holds nothing unread.
    pub fn unread(&self, feed_len: u64, max_batch: u64) -> Range<u64> {
        let from = self.read_up_to;
        let to = feed_len.min(from.saturating_add(max_batch));
        if to <= from {
            from..from
        } else {
            from..to
        }
    }
}

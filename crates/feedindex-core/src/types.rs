//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IndexerError;

// ─── FeedKey ─────────────────────────────────────────────────────────────────

/// Length in bytes of a feed key.
pub const FEED_KEY_LEN: usize = 32;

/// Stable identity of a feed.
///
/// The key is opaque to the engine. Its lowercase hex form is used as the
/// lookup key in the persisted cursor map and in log output.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedKey([u8; FEED_KEY_LEN]);

impl FeedKey {
    pub const fn new(bytes: [u8; FEED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a byte slice. Fails unless the slice is exactly
    /// [`FEED_KEY_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IndexerError> {
        let arr: [u8; FEED_KEY_LEN] = bytes.try_into().map_err(|_| {
            IndexerError::Decode(format!(
                "feed key must be {FEED_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; FEED_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex encoding, as used in the cursor map.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shortened hex form for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl FromStr for FeedKey {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)
            .map_err(|e| IndexerError::Decode(format!("invalid feed key '{s}': {e}")))?;
        Self::from_slice(&raw)
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey({})", self.short())
    }
}

impl From<[u8; FEED_KEY_LEN]> for FeedKey {
    fn from(bytes: [u8; FEED_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for FeedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FeedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── BatchRecord ─────────────────────────────────────────────────────────────

/// One unread record handed to the sink.
///
/// Within a single feed, records arrive in increasing `seq` order. Records
/// from different feeds are never mixed into one batch, and no ordering is
/// implied between batches of different feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    /// Feed the record was read from.
    pub feed_key: FeedKey,
    /// Zero-based position of the record in its feed.
    pub seq: u64,
    /// Raw record payload.
    pub value: Bytes,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

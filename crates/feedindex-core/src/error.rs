//! Error types for the feedindex pipeline.

use thiserror::Error;

/// Errors that can occur while configuring or running an indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Snapshot decode error: {0}")]
    Decode(String),

    #[error("Feed error on '{feed}': {reason}")]
    Feed { feed: String, reason: String },

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Index clear failed: {0}")]
    Clear(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error came from decoding a persisted snapshot.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns `true` if the error was raised while building the indexer.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Decode(err.to_string())
    }
}

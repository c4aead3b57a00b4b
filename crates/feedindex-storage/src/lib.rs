//! feedindex-storage — persistent cursor stores for FeedIndex.
//!
//! Backends:
//! - [`file`] — a single snapshot file, replaced atomically on every write
//! - [`sqlite`] — SQLite via `sqlx`, one row per indexer
//!
//! The in-memory store lives in `feedindex-core` as
//! [`feedindex_core::MemoryCursorStore`].

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "file")]
pub use file::FileCursorStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;

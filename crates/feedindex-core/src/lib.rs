//! feedindex-core — incremental, crash-safe indexing of append-only feeds.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → Indexer (handle) ── Scheduler (task)
//!                                          ├── FeedRegistry  (known feeds, trigger wiring)
//!                                          ├── Cursor map    (per-feed read position)
//!                                          ├── IndexSink     (user indexing function)
//!                                          └── CursorStore   (memory / file / SQLite)
//! ```
//!
//! Records are delivered at least once: a feed's cursor is persisted only
//! after the sink has finished the batch that advanced it.

pub mod builder;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod indexer;
pub mod memory;
mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod types;

pub use builder::IndexerBuilder;
pub use cursor::{Cursor, CursorMap};
pub use error::IndexerError;
pub use feed::{Feed, FeedEvent, FeedLog, FeedRegistry};
pub use indexer::{Indexer, IndexerConfig, IndexerEvent, IndexerStatus};
pub use memory::{MemoryFeed, MemoryLog};
pub use sink::{FnSink, IndexSink};
pub use snapshot::IndexSnapshot;
pub use store::{CursorStore, IndexClearer, MemoryCursorStore, SnapshotStore};
pub use types::{BatchRecord, FeedKey, FEED_KEY_LEN};

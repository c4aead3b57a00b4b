//! SQLite cursor store for FeedIndex.
//!
//! Persists the encoded snapshot as a blob, one row per indexer id, so
//! several indexers can share a database file. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use feedindex_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./cursors.db").await?.with_id("search");
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use feedindex_core::error::IndexerError;
use feedindex_core::store::{CursorStore, IndexClearer};

const DEFAULT_INDEXER_ID: &str = "default";

/// SQLite-backed cursor store.
#[derive(Clone)]
pub struct SqliteCursorStore {
    pool: SqlitePool,
    indexer_id: String,
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./cursors.db"`) or a full
    /// SQLite URL (`"sqlite:./cursors.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        Self::from_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection of an in-memory database sees its own data, so the
    /// pool is pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, IndexerError> {
        let store = Self {
            pool,
            indexer_id: DEFAULT_INDEXER_ID.to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Store the snapshot under `id` instead of `"default"`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.indexer_id = id.into();
        self
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursor_state (
                indexer_id TEXT    PRIMARY KEY,
                state      BLOB    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Unix timestamp of the last write, if any.
    pub async fn updated_at(&self) -> Result<Option<i64>, IndexerError> {
        let row = sqlx::query("SELECT updated_at FROM cursor_state WHERE indexer_id = ?")
            .bind(&self.indexer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("updated_at")))
    }

    /// Delete this indexer's row.
    pub async fn delete(&self) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM cursor_state WHERE indexer_id = ?")
            .bind(&self.indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(indexer_id = %self.indexer_id, "cursor state deleted");
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, IndexerError> {
        let row = sqlx::query("SELECT state FROM cursor_state WHERE indexer_id = ?")
            .bind(&self.indexer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("state")))
    }

    async fn store(&self, state: Vec<u8>) -> Result<(), IndexerError> {
        let len = state.len();
        sqlx::query(
            "INSERT OR REPLACE INTO cursor_state (indexer_id, state, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&self.indexer_id)
        .bind(state)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(indexer_id = %self.indexer_id, bytes = len, "cursor state saved");
        Ok(())
    }
}

#[async_trait]
impl IndexClearer for SqliteCursorStore {
    async fn clear(&self) -> Result<(), IndexerError> {
        self.delete().await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use feedindex_core::cursor::Cursor;
    use feedindex_core::snapshot::IndexSnapshot;
    use feedindex_core::store::SnapshotStore;
    use feedindex_core::types::{FeedKey, FEED_KEY_LEN};
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_store_fetches_none() {
        let store = SqliteCursorStore::in_memory().await.unwrap();
        assert!(store.fetch().await.unwrap().is_none());
        assert!(store.updated_at().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_upsert() {
        let store = SqliteCursorStore::in_memory().await.unwrap();

        store.store(b"old".to_vec()).await.unwrap();
        store.store(b"new".to_vec()).await.unwrap();

        assert_eq!(store.fetch().await.unwrap().unwrap(), b"new");
        assert!(store.updated_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn indexer_ids_are_isolated() {
        let search = SqliteCursorStore::in_memory().await.unwrap().with_id("search");
        let stats = search.clone().with_id("stats");

        search.store(b"s".to_vec()).await.unwrap();
        assert!(stats.fetch().await.unwrap().is_none());

        stats.store(b"t".to_vec()).await.unwrap();
        stats.clear().await.unwrap();
        assert!(stats.fetch().await.unwrap().is_none());
        assert_eq!(search.fetch().await.unwrap().unwrap(), b"s");
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let store = Arc::new(SqliteCursorStore::in_memory().await.unwrap());
        let snapshots = SnapshotStore::new(store);
        let key = FeedKey::new([0xab; FEED_KEY_LEN]);

        let mut snap = IndexSnapshot::new(2);
        snap.cursors.insert(key, Cursor { key, read_up_to: 1_000 });
        snapshots.save(&snap).await.unwrap();

        assert_eq!(snapshots.load().await.unwrap().unwrap(), snap);
    }
}

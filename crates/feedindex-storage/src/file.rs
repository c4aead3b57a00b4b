//! File-backed cursor store.
//!
//! Keeps the encoded snapshot in one file. Writes go to a sibling `.tmp`
//! file first and are renamed over the target, so a crash mid-write leaves
//! either the old or the new snapshot, never a torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use feedindex_core::error::IndexerError;
use feedindex_core::store::{CursorStore, IndexClearer};

/// Persists the snapshot to a single file on disk.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Use `path` as the snapshot file. Missing parent directories are
    /// created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Remove the snapshot file. Removing a missing file is not an error.
    pub async fn delete(&self) -> Result<(), IndexerError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "snapshot file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(&self.path, e)),
        }
    }
}

fn storage_err(path: &Path, e: std::io::Error) -> IndexerError {
    IndexerError::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, IndexerError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&self.path, e)),
        }
    }

    async fn store(&self, state: Vec<u8>) -> Result<(), IndexerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(parent, e))?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, &state)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))?;

        debug!(path = %self.path.display(), bytes = state.len(), "snapshot written");
        Ok(())
    }
}

#[async_trait]
impl IndexClearer for FileCursorStore {
    async fn clear(&self) -> Result<(), IndexerError> {
        self.delete().await
    }
}

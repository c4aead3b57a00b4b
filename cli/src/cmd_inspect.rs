//! `feedindex inspect` — decode and print a persisted cursor snapshot.

use std::sync::Arc;

use anyhow::{Context, Result};
use feedindex_core::{CursorStore, IndexSnapshot};
use feedindex_storage::{FileCursorStore, SqliteCursorStore};

pub async fn run(path: &str, sqlite: bool, id: &str, json: bool) -> Result<()> {
    let store: Arc<dyn CursorStore> = if sqlite {
        let store = SqliteCursorStore::open(path)
            .await
            .with_context(|| format!("opening database {path}"))?;
        Arc::new(store.with_id(id))
    } else {
        Arc::new(FileCursorStore::new(path))
    };

    let Some(raw) = store.fetch().await.context("reading cursor state")? else {
        println!("No cursor state stored at {path}");
        return Ok(());
    };
    let snapshot = IndexSnapshot::decode(&raw).context("decoding cursor state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Snapshot version: {}", snapshot.version);
    println!("Feeds:            {}", snapshot.cursors.len());
    for cursor in snapshot.cursors.values() {
        println!("  {}  read up to {}", cursor.key, cursor.read_up_to);
    }
    Ok(())
}

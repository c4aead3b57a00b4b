//! `feedindex demo` — index a generated in-memory log and report progress.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use feedindex_core::{
    BatchRecord, FeedKey, FnSink, IndexerBuilder, IndexerConfig, IndexerEvent, MemoryLog,
    FEED_KEY_LEN,
};
use feedindex_storage::FileCursorStore;
use tracing::info;

pub struct DemoArgs<'a> {
    pub feeds: u8,
    pub records: u32,
    pub config: Option<&'a Path>,
    pub store: Option<&'a Path>,
}

fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    let Some(path) = path else {
        return Ok(IndexerConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

pub async fn run(args: DemoArgs<'_>) -> Result<()> {
    let config = load_config(args.config)?;

    let log = Arc::new(MemoryLog::new());
    for i in 0..args.feeds {
        let mut key = [0u8; FEED_KEY_LEN];
        key[0] = i;
        let feed = log.add_feed(FeedKey::new(key));
        feed.extend((0..args.records).map(|n| format!("feed {i} record {n}")));
    }

    let indexed = Arc::new(AtomicU64::new(0));
    let batches = Arc::new(AtomicU64::new(0));
    let sink = {
        let (indexed, batches) = (indexed.clone(), batches.clone());
        FnSink::new(move |batch: Vec<BatchRecord>| {
            let (indexed, batches) = (indexed.clone(), batches.clone());
            async move {
                indexed.fetch_add(batch.len() as u64, Ordering::Relaxed);
                batches.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
    };

    let mut builder = IndexerBuilder::new(log, Arc::new(sink)).config(config);
    if let Some(path) = args.store {
        let store = Arc::new(FileCursorStore::new(path));
        builder = builder.store(store.clone()).clear_index(store);
    }
    let mut events = builder.subscribe();
    let indexer = builder.build()?;

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let IndexerEvent::Indexed(batch) = event {
                info!(
                    feed = %batch[0].feed_key.short(),
                    first = batch[0].seq,
                    len = batch.len(),
                    "batch indexed"
                );
            }
        }
    });

    indexer
        .ready()
        .await
        .map_err(|err| anyhow!("indexer failed: {err}"))?;

    println!("Indexer ready (version {})", indexer.config().version);
    println!("  Feeds:   {}", args.feeds);
    println!("  Batches: {}", batches.load(Ordering::Relaxed));
    println!("  Records: {}", indexed.load(Ordering::Relaxed));
    Ok(())
}

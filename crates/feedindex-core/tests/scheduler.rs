//! End-to-end tests for the indexing scheduler over the in-memory feed log.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feedindex_core::{
    BatchRecord, Cursor, CursorStore, FeedKey, IndexClearer, IndexSink, IndexSnapshot, Indexer,
    IndexerBuilder, IndexerError, IndexerEvent, IndexerStatus, MemoryCursorStore, MemoryFeed,
    MemoryLog, FEED_KEY_LEN,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{Notify, Semaphore};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn key(b: u8) -> FeedKey {
    FeedKey::new([b; FEED_KEY_LEN])
}

/// Records every batch it is handed; can be told to fail.
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<BatchRecord>>>,
    fail: AtomicBool,
}

impl RecordingSink {
    fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    fn records(&self) -> Vec<BatchRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    fn seqs_of(&self, feed: FeedKey) -> Vec<u64> {
        self.records()
            .into_iter()
            .filter(|r| r.feed_key == feed)
            .map(|r| r.seq)
            .collect()
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl IndexSink for RecordingSink {
    async fn apply(&self, batch: &[BatchRecord]) -> Result<(), IndexerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IndexerError::Sink("sink unavailable".into()));
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// A store whose reads or writes always fail.
struct BrokenStore {
    fail_fetch: bool,
}

#[async_trait]
impl CursorStore for BrokenStore {
    async fn fetch(&self) -> Result<Option<Vec<u8>>, IndexerError> {
        if self.fail_fetch {
            return Err(IndexerError::Storage("disk on fire".into()));
        }
        Ok(None)
    }

    async fn store(&self, _state: Vec<u8>) -> Result<(), IndexerError> {
        Err(IndexerError::Storage("read-only".into()))
    }
}

#[derive(Default)]
struct CountingClearer {
    calls: AtomicUsize,
}

#[async_trait]
impl IndexClearer for CountingClearer {
    async fn clear(&self) -> Result<(), IndexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenClearer;

#[async_trait]
impl IndexClearer for BrokenClearer {
    async fn clear(&self) -> Result<(), IndexerError> {
        Err(IndexerError::Storage("cannot drop tables".into()))
    }
}

fn seeded_store(version: u32, cursors: &[(FeedKey, u64)]) -> Arc<MemoryCursorStore> {
    let mut snapshot = IndexSnapshot::new(version);
    for (key, read_up_to) in cursors {
        snapshot.cursors.insert(
            *key,
            Cursor {
                key: *key,
                read_up_to: *read_up_to,
            },
        );
    }
    Arc::new(MemoryCursorStore::with_state(snapshot.encode().unwrap()))
}

async fn stored_snapshot(store: &MemoryCursorStore) -> Option<IndexSnapshot> {
    store
        .fetch()
        .await
        .unwrap()
        .map(|raw| IndexSnapshot::decode(&raw).unwrap())
}

async fn ready(indexer: &Indexer) -> Result<(), Arc<IndexerError>> {
    tokio::time::timeout(Duration::from_secs(5), indexer.ready())
        .await
        .expect("indexer did not settle in time")
}

/// Poll until the sink has seen `n` records.
async fn wait_for_records(sink: &RecordingSink, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.records().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records were not delivered in time");
}

async fn next_error(events: &mut broadcast::Receiver<IndexerEvent>) -> Arc<IndexerError> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(IndexerEvent::Error(err)) => return err,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("no error event")
}

// ─── Draining ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn drains_every_feed_in_order() {
    let log = Arc::new(MemoryLog::new());
    let a = log.add_feed(key(1));
    let b = log.add_feed(key(2));
    a.extend(["a0", "a1", "a2"]);
    b.extend(["b0", "b1", "b2", "b3", "b4"]);

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log.clone(), sink.clone()).build().unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(indexer.status(), IndexerStatus::Ready);
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1, 2]);
    assert_eq!(sink.seqs_of(key(2)), vec![0, 1, 2, 3, 4]);

    // Every batch holds records of a single feed.
    for batch in sink.batches.lock().unwrap().iter() {
        assert!(batch.iter().all(|r| r.feed_key == batch[0].feed_key));
    }
}

#[tokio::test]
async fn empty_log_becomes_ready() {
    let log = Arc::new(MemoryLog::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone()).build().unwrap();

    ready(&indexer).await.unwrap();
    assert!(sink.records().is_empty());
    assert!(indexer.failure().is_none());
}

#[tokio::test]
async fn batches_are_bounded_by_max_batch_size() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend((0..120u32).map(|i| i.to_string()));

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .max_batch_size(50)
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(sink.batch_sizes(), vec![50, 50, 20]);
    assert_eq!(sink.seqs_of(key(1)), (0..120).collect::<Vec<_>>());
}

#[tokio::test]
async fn indexed_events_follow_sink_batches() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(4));
    feed.extend(["x", "y", "z"]);

    let sink = Arc::new(RecordingSink::default());
    let mut builder = IndexerBuilder::new(log, sink.clone()).max_batch_size(2);
    let mut events = builder.subscribe();
    let _indexer = builder.build().unwrap();

    let mut indexed = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            IndexerEvent::Indexed(batch) => indexed.push(batch.to_vec()),
            IndexerEvent::Ready => break,
            IndexerEvent::Error(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(indexed.len(), 2);
    assert_eq!(indexed[0].len(), 2);
    assert_eq!(indexed[1][0].seq, 2);
    assert_eq!(indexed[1][0].value.as_ref(), b"z");
}

#[tokio::test]
async fn appends_after_ready_are_indexed() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.append("first");

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone()).build().unwrap();
    ready(&indexer).await.unwrap();
    assert_eq!(sink.records().len(), 1);

    feed.append("second");
    feed.append("third");
    wait_for_records(&sink, 3).await;
    ready(&indexer).await.unwrap();
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1, 2]);
}

#[tokio::test]
async fn concurrent_appends_are_delivered_once() {
    let log = Arc::new(MemoryLog::new());
    let a = log.add_feed(key(1));
    let b = log.add_feed(key(2));

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .max_batch_size(7)
        .build()
        .unwrap();

    let writer = tokio::spawn(async move {
        for i in 0..60u32 {
            a.append(format!("a{i}"));
            b.append(format!("b{i}"));
            if i % 5 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });
    writer.await.unwrap();

    wait_for_records(&sink, 120).await;
    ready(&indexer).await.unwrap();
    assert_eq!(sink.seqs_of(key(1)), (0..60).collect::<Vec<_>>());
    assert_eq!(sink.seqs_of(key(2)), (0..60).collect::<Vec<_>>());
    assert_eq!(sink.records().len(), 120);
}

/// Blocks every `apply` until the test hands out permits.
struct GatedSink {
    inner: RecordingSink,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl IndexSink for GatedSink {
    async fn apply(&self, batch: &[BatchRecord]) -> Result<(), IndexerError> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.apply(batch).await
    }
}

#[tokio::test]
async fn appends_during_a_pass_cost_one_more_pass() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.append("r0");

    let sink = Arc::new(GatedSink {
        inner: RecordingSink::default(),
        entered: Notify::new(),
        gate: Semaphore::new(0),
    });
    let indexer = IndexerBuilder::new(log, sink.clone()).build().unwrap();

    // The first batch is now stuck in the sink.
    tokio::time::timeout(Duration::from_secs(5), sink.entered.notified())
        .await
        .unwrap();
    for i in 1..=10 {
        feed.append(format!("r{i}"));
    }
    sink.gate.add_permits(16);

    ready(&indexer).await.unwrap();
    let seqs: Vec<Vec<u64>> = sink
        .inner
        .batches
        .lock()
        .unwrap()
        .iter()
        .map(|batch| batch.iter().map(|r| r.seq).collect())
        .collect();
    assert_eq!(seqs, vec![vec![0], (1..=10).collect::<Vec<_>>()]);
}

#[tokio::test]
async fn feed_discovered_after_start_is_indexed() {
    let log = Arc::new(MemoryLog::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log.clone(), sink.clone()).build().unwrap();
    ready(&indexer).await.unwrap();

    let late = Arc::new(MemoryFeed::unopened(key(8)));
    late.extend(["l0", "l1"]);
    log.insert(late.clone());
    late.open();

    wait_for_records(&sink, 2).await;
    assert_eq!(sink.seqs_of(key(8)), vec![0, 1]);

    // Appends on the discovered feed are watched too.
    late.append("l2");
    wait_for_records(&sink, 3).await;
    assert_eq!(sink.seqs_of(key(8)), vec![0, 1, 2]);
}

// ─── Availability ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_record_truncates_batch_until_downloaded() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend(["r0", "r1"]);
    feed.announce(2);
    feed.append("r4");

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone()).build().unwrap();
    ready(&indexer).await.unwrap();

    // Only the prefix before the gap is delivered.
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1]);

    feed.download(3, "r3").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    ready(&indexer).await.unwrap();
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1]);

    feed.download(2, "r2").unwrap();
    wait_for_records(&sink, 5).await;
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1, 2, 3, 4]);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn restart_does_not_redeliver() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend(["a", "b", "c"]);
    let store = Arc::new(MemoryCursorStore::new());

    let first = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log.clone(), first.clone())
        .store(store.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();
    drop(indexer);
    assert_eq!(first.records().len(), 3);

    let snapshot = stored_snapshot(&store).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.cursor(&key(1)).unwrap().read_up_to, 3);

    let second = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log.clone(), second.clone())
        .store(store.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();
    assert!(second.records().is_empty());

    feed.append("d");
    wait_for_records(&second, 1).await;
    assert_eq!(second.seqs_of(key(1)), vec![3]);
}

#[tokio::test]
async fn resumes_from_persisted_cursor() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend(["0", "1", "2", "3", "4"]);
    let store = seeded_store(1, &[(key(1), 2)]);

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .store(store.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(sink.seqs_of(key(1)), vec![2, 3, 4]);
    let snapshot = stored_snapshot(&store).await.unwrap();
    assert_eq!(snapshot.cursor(&key(1)).unwrap().read_up_to, 5);
}

#[tokio::test]
async fn version_change_clears_index_and_reindexes() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend(["0", "1", "2", "3"]);
    let store = seeded_store(1, &[(key(1), 3)]);
    let clearer = Arc::new(CountingClearer::default());

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .version(2)
        .store(store.clone())
        .clear_index(clearer.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(clearer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.seqs_of(key(1)), vec![0, 1, 2, 3]);
    let snapshot = stored_snapshot(&store).await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.cursor(&key(1)).unwrap().read_up_to, 4);
}

#[tokio::test]
async fn version_change_without_clearer_keeps_cursors() {
    let log = Arc::new(MemoryLog::new());
    let feed = log.add_feed(key(1));
    feed.extend(["0", "1", "2", "3"]);
    let store = seeded_store(1, &[(key(1), 3)]);

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .version(2)
        .store(store.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(sink.seqs_of(key(1)), vec![3]);
    let snapshot = stored_snapshot(&store).await.unwrap();
    assert_eq!(snapshot.version, 2);
}

#[tokio::test]
async fn matching_version_never_clears() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).extend(["0", "1"]);
    let store = seeded_store(3, &[(key(1), 1)]);
    let clearer = Arc::new(CountingClearer::default());

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .version(3)
        .store(store)
        .clear_index(clearer.clone())
        .build()
        .unwrap();
    ready(&indexer).await.unwrap();

    assert_eq!(clearer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.seqs_of(key(1)), vec![1]);
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_failure_stops_before_ready() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).append("never");

    let sink = Arc::new(RecordingSink::default());
    let mut builder = IndexerBuilder::new(log, sink.clone())
        .store(Arc::new(BrokenStore { fail_fetch: true }));
    let mut events = builder.subscribe();
    let indexer = builder.build().unwrap();

    let err = ready(&indexer).await.unwrap_err();
    assert!(matches!(*err, IndexerError::Storage(_)));
    assert!(matches!(*next_error(&mut events).await, IndexerError::Storage(_)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(indexer.status(), IndexerStatus::Indexing);
    assert!(indexer.failure().is_some());
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn corrupt_snapshot_is_a_decode_error() {
    let log = Arc::new(MemoryLog::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink)
        .store(Arc::new(MemoryCursorStore::with_state(b"not json".to_vec())))
        .build()
        .unwrap();

    let err = ready(&indexer).await.unwrap_err();
    assert!(err.is_decode());
}

#[tokio::test]
async fn clear_failure_stops_before_ready() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).append("x");
    let store = seeded_store(1, &[(key(1), 0)]);

    let sink = Arc::new(RecordingSink::default());
    let mut builder = IndexerBuilder::new(log, sink.clone())
        .version(2)
        .store(store)
        .clear_index(Arc::new(BrokenClearer));
    let mut events = builder.subscribe();
    let indexer = builder.build().unwrap();

    let err = ready(&indexer).await.unwrap_err();
    assert!(matches!(*err, IndexerError::Clear(_)));
    assert!(matches!(*next_error(&mut events).await, IndexerError::Clear(_)));
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn sink_failure_halts_without_advancing() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).extend(["a", "b"]);
    let store = Arc::new(MemoryCursorStore::new());

    let sink = Arc::new(RecordingSink::failing());
    let mut builder = IndexerBuilder::new(log, sink)
        .store(store.clone());
    let mut events = builder.subscribe();
    let indexer = builder.build().unwrap();

    let err = next_error(&mut events).await;
    assert!(matches!(*err, IndexerError::Sink(_)));
    assert!(ready(&indexer).await.is_err());
    assert!(store.is_empty());
}

#[tokio::test]
async fn store_failure_halts() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).append("a");

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone())
        .store(Arc::new(BrokenStore { fail_fetch: false }))
        .build()
        .unwrap();

    let err = ready(&indexer).await.unwrap_err();
    assert!(matches!(*err, IndexerError::Storage(_)));
    // The sink saw the batch, but its cursor was never persisted.
    assert_eq!(sink.records().len(), 1);
}

// ─── Readiness ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn waits_for_log_to_open() {
    let log = Arc::new(MemoryLog::unopened());
    log.add_feed(key(1)).append("a");

    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log.clone(), sink.clone()).build().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(indexer.status(), IndexerStatus::Indexing);
    assert!(sink.records().is_empty());

    log.open();
    ready(&indexer).await.unwrap();
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn on_ready_runs_callback_on_another_task() {
    let log = Arc::new(MemoryLog::new());
    log.add_feed(key(1)).extend(["a", "b"]);
    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink.clone()).build().unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let observed = sink.clone();
    indexer.on_ready(move || {
        let _ = tx.send(observed.records().len());
    });

    let seen = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, 2);

    // Already ready: the callback still runs, just not inline.
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let handle = indexer.on_ready(move || flag.store(true, Ordering::SeqCst));
    assert!(!called.load(Ordering::SeqCst));
    handle.await.unwrap();
    assert!(called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn on_ready_skipped_after_failure() {
    let log = Arc::new(MemoryLog::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = IndexerBuilder::new(log, sink)
        .store(Arc::new(BrokenStore { fail_fetch: true }))
        .build()
        .unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let handle = indexer.on_ready(move || flag.store(true, Ordering::SeqCst));
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!called.load(Ordering::SeqCst));
}

// ─── Multi-threaded runtime ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builder_subscribers_see_startup_error() {
    for _ in 0..50 {
        let log = Arc::new(MemoryLog::new());
        let mut builder = IndexerBuilder::new(log, Arc::new(RecordingSink::default()))
            .store(Arc::new(BrokenStore { fail_fetch: true }));
        let mut events = builder.subscribe();
        let indexer = builder.build().unwrap();

        let err = next_error(&mut events).await;
        assert!(matches!(*err, IndexerError::Storage(_)));
        assert!(ready(&indexer).await.is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builder_subscribers_see_first_ready() {
    for _ in 0..50 {
        let log = Arc::new(MemoryLog::new());
        log.add_feed(key(1)).extend(["a", "b"]);
        let mut builder = IndexerBuilder::new(log, Arc::new(RecordingSink::default()));
        let mut events = builder.subscribe();
        let _indexer = builder.build().unwrap();

        let mut indexed = 0;
        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await.unwrap() {
                    IndexerEvent::Indexed(batch) => indexed += batch.len(),
                    IndexerEvent::Ready => break,
                    IndexerEvent::Error(err) => panic!("unexpected error: {err}"),
                }
            }
        })
        .await;
        assert!(outcome.is_ok(), "first Ready was not delivered");
        assert_eq!(indexed, 2);
    }
}

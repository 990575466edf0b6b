//! End-to-end river tests against the in-memory WAL, index and checkpoint
//! store. Time is paused, so backoff and bulk timeouts elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use arangodb_river::{FnScript, River, RiverConfig, RiverError};
use arangodb_wal_source::testing::MemoryWal;
use arangodb_wal_source::SourceError;
use checkpoint::{CheckpointStore, MemoryStore, TickCheckpoint};
use elasticsearch_sink::MemoryIndex;
use serde_json::json;
use sync_core::{ChangeEvent, Document, Tick};

const COLLECTION: &str = "orders";

type TestRiver = River<MemoryWal, MemoryIndex, MemoryStore>;

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn config() -> RiverConfig {
    RiverConfig::for_river(COLLECTION)
}

struct Fixture {
    wal: Arc<MemoryWal>,
    index: Arc<MemoryIndex>,
    store: Arc<MemoryStore>,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_store(MemoryStore::new()).await
    }

    async fn with_store(store: MemoryStore) -> Self {
        let wal = Arc::new(MemoryWal::new());
        wal.create_collection(COLLECTION).await;
        Self {
            wal,
            index: Arc::new(MemoryIndex::new()),
            store: Arc::new(store),
        }
    }

    fn river(&self, config: RiverConfig) -> TestRiver {
        River::new(
            config,
            self.wal.clone(),
            self.index.clone(),
            self.store.clone(),
        )
    }

    async fn insert_many(&self, n: usize) -> Tick {
        let mut last = Tick::origin();
        for i in 0..n {
            last = self
                .wal
                .insert(COLLECTION, &format!("k{i:04}"), doc(json!({"n": i})))
                .await;
        }
        last
    }

    async fn checkpoint(&self) -> Option<Tick> {
        self.store
            .read_checkpoint(COLLECTION)
            .await
            .unwrap()
            .map(|cp| cp.last_tick)
    }

    /// Wait until the checkpoint reached `tick`.
    async fn wait_for_checkpoint(&self, tick: &Tick) {
        for _ in 0..2_000 {
            if self.checkpoint().await.is_some_and(|t| t >= *tick) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "checkpoint never reached {tick}, last seen {:?}",
            self.checkpoint().await
        );
    }

    async fn document(&self, key: &str) -> Option<Document> {
        self.index.document(COLLECTION, key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_follow_bulk_size_and_timeout() {
    let fx = Fixture::new().await;
    let last = fx.insert_many(250).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    assert!(river.is_running());

    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();

    assert_eq!(fx.index.accepted_batch_sizes().await, vec![100, 100, 50]);
    assert_eq!(fx.index.documents(COLLECTION).await.len(), 250);
    assert_eq!(fx.checkpoint().await, Some(last));

    // Excluded fields never reach the index.
    let first = fx.document("k0000").await.unwrap();
    assert_eq!(first, doc(json!({"n": 0})));
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_waits_for_retried_bulk() {
    let fx = Fixture::new().await;
    let last = fx.insert_many(3).await;
    fx.index.fail_next_bulks(1).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();

    let attempts = fx.index.attempts().await;
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].response.is_none());
    assert!(attempts[1].response.is_some());
    assert_eq!(attempts[0].operations, attempts[1].operations);

    // Only the acknowledged attempt moved the checkpoint.
    let history = fx.store.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].last_tick, last);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_after_checkpoint() {
    let fx = Fixture::new().await;
    let first_run = fx.insert_many(3).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&first_run).await;
    river.close().await.unwrap();

    let later = fx
        .wal
        .insert(COLLECTION, "late", doc(json!({"n": 99})))
        .await;
    fx.wal.remove(COLLECTION, "k0001").await;
    let second_run = fx.wal.last_tick().await;
    assert!(later < second_run);

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&second_run).await;
    river.close().await.unwrap();

    // The second run only sent what happened after the checkpoint and kept
    // the index it resumed into.
    assert_eq!(fx.index.accepted_batch_sizes().await, vec![3, 2]);
    let documents = fx.index.documents(COLLECTION).await;
    let keys: Vec<&str> = documents.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["k0000", "k0002", "late"]);
}

#[tokio::test(start_paused = true)]
async fn test_replay_from_origin_is_idempotent() {
    let fx = Fixture::new().await;
    fx.insert_many(4).await;
    fx.wal
        .update(COLLECTION, "k0000", doc(json!({"n": 100})))
        .await;
    fx.wal.remove(COLLECTION, "k0003").await;
    let last = fx.wal.last_tick().await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();
    let snapshot = fx.index.documents(COLLECTION).await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot["k0000"], doc(json!({"n": 100})));

    let mut replay = config();
    replay.source.drop_target = false;
    let mut river = fx.river(replay).with_start_tick(Tick::origin());
    river.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    river.close().await.unwrap();

    assert_eq!(fx.index.attempts().await.len(), 2);
    assert_eq!(fx.index.documents(COLLECTION).await, snapshot);
    assert_eq!(fx.checkpoint().await, Some(last));
}

#[tokio::test(start_paused = true)]
async fn test_script_can_drop_and_rewrite_documents() {
    let fx = Fixture::new().await;
    fx.wal
        .insert(COLLECTION, "public", doc(json!({"title": "a"})))
        .await;
    let last = fx
        .wal
        .insert(COLLECTION, "secret", doc(json!({"title": "b"})))
        .await;

    let script = FnScript::new(|event: &ChangeEvent, mut document: Document| {
        if event.key == "secret" {
            return Ok(None);
        }
        document.insert("origin".to_string(), json!(event.collection));
        Ok(Some(document))
    });
    let mut river = fx.river(config()).with_script(Arc::new(script));
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();

    assert_eq!(
        fx.document("public").await,
        Some(doc(json!({"title": "a", "origin": "orders"})))
    );
    assert!(fx.document("secret").await.is_none());
    assert_eq!(fx.checkpoint().await, Some(last));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_document_does_not_block_the_river() {
    let fx = Fixture::new().await;
    fx.index.reject_id("bad").await;
    fx.wal.insert(COLLECTION, "good", doc(json!({"n": 1}))).await;
    fx.wal.insert(COLLECTION, "bad", doc(json!({"n": 2}))).await;
    let last = fx.wal.insert(COLLECTION, "fine", doc(json!({"n": 3}))).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();

    let documents = fx.index.documents(COLLECTION).await;
    let keys: Vec<&str> = documents.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["fine", "good"]);
    assert_eq!(fx.index.attempts().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_purged_checkpoint_rescans_collection() {
    let fx = Fixture::with_store(MemoryStore::with_checkpoint(TickCheckpoint::new(
        COLLECTION,
        Tick::from("1"),
    )))
    .await;
    fx.insert_many(3).await;
    fx.wal
        .update(COLLECTION, "k0000", doc(json!({"n": 7})))
        .await;
    fx.wal.purge_through(fx.wal.last_tick().await).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let documents = fx.index.documents(COLLECTION).await;
    assert_eq!(documents.len(), 3);
    assert_eq!(documents["k0000"], doc(json!({"n": 7})));
    assert_eq!(fx.wal.open_cursors().await, 0);

    // Tailing continues after the scan.
    let later = fx.wal.insert(COLLECTION, "new", doc(json!({"n": 4}))).await;
    fx.wait_for_checkpoint(&later).await;
    river.close().await.unwrap();
    assert!(fx.document("new").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_source_error_stops_the_river() {
    let fx = Fixture::new().await;
    fx.wal
        .fail_next_polls([SourceError::Fatal("replication not permitted".to_string())])
        .await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), river.stopped())
        .await
        .expect("river should stop on its own");
    assert!(!river.is_running());

    let result = river.close().await;
    assert!(matches!(result, Err(RiverError::Source(SourceError::Fatal(_)))));
    assert!(fx.wal.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let fx = Fixture::new().await;
    let mut river = fx.river(config());

    // Before start: nothing to stop.
    river.close().await.unwrap();
    assert!(!fx.wal.is_closed().await);

    river.start().await.unwrap();
    river.close().await.unwrap();
    river.close().await.unwrap();
    assert!(fx.wal.is_closed().await);
    assert!(!river.is_running());

    // A closed river cannot be restarted.
    assert!(matches!(
        river.start().await,
        Err(RiverError::AlreadyStarted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_refused() {
    let fx = Fixture::new().await;
    let mut river = fx.river(config());
    river.start().await.unwrap();
    assert!(matches!(
        river.start().await,
        Err(RiverError::AlreadyStarted(name)) if name == COLLECTION
    ));
    river.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_target_dropped_only_when_starting_from_beginning() {
    // Resuming keeps what is already indexed.
    let fx = Fixture::with_store(MemoryStore::with_checkpoint(TickCheckpoint::new(
        COLLECTION,
        Tick::from("1"),
    )))
    .await;
    fx.insert_many(1).await;
    fx.index.seed(COLLECTION, "stale", doc(json!({}))).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    river.close().await.unwrap();
    assert!(fx.document("stale").await.is_some());

    // Without a checkpoint the index is recreated.
    let fx = Fixture::new().await;
    fx.index.seed(COLLECTION, "stale", doc(json!({}))).await;
    let last = fx.insert_many(1).await;

    let mut river = fx.river(config());
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();
    assert!(fx.document("stale").await.is_none());
    assert!(fx.document("k0000").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_missing_collection_fails_start() {
    let fx = Fixture::new().await;
    let mut config = config();
    config.source.collection = "missing".to_string();

    let mut river = fx.river(config);
    let result = river.start().await;
    assert!(matches!(result, Err(RiverError::Source(SourceError::Fatal(_)))));
    assert!(!river.is_running());
    river.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_queue() {
    let fx = Fixture::new().await;
    let last = fx.insert_many(20).await;

    let mut config = config();
    config.target.throttle_size = -1;
    config.target.bulk_size = 8;

    let mut river = fx.river(config);
    river.start().await.unwrap();
    fx.wait_for_checkpoint(&last).await;
    river.close().await.unwrap();

    assert_eq!(fx.index.accepted_batch_sizes().await, vec![8, 8, 4]);
}

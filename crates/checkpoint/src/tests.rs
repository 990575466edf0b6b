//! Unit tests for the checkpoint crate.

use sync_core::Tick;
use tempfile::TempDir;

use crate::{Checkpoint, CheckpointStorage, CheckpointStore, FilesystemStore, MemoryStore, TickCheckpoint};

// ============================================================================
// TickCheckpoint Tests
// ============================================================================

#[test]
fn test_tick_checkpoint_cli_string_roundtrip() {
    let original = TickCheckpoint::new("orders", Tick::from("12345"));

    let cli_string = original.to_cli_string();
    assert_eq!(cli_string, "orders:12345");

    let decoded = TickCheckpoint::from_cli_string(&cli_string).unwrap();
    assert_eq!(decoded.collection, "orders");
    assert_eq!(decoded.last_tick, Tick::from("12345"));
}

#[test]
fn test_tick_checkpoint_invalid_cli_string() {
    assert!(TickCheckpoint::from_cli_string("no-separator").is_err());
    assert!(TickCheckpoint::from_cli_string(":123").is_err());
    assert!(TickCheckpoint::from_cli_string("orders:").is_err());
}

#[test]
fn test_tick_checkpoint_database_type() {
    assert_eq!(TickCheckpoint::DATABASE_TYPE, "arangodb");
}

// ============================================================================
// CheckpointStorage Tests
// ============================================================================

#[test]
fn test_default_index_storage() {
    assert_eq!(
        CheckpointStorage::default_index("products"),
        CheckpointStorage::Index {
            index: "river-products".to_string()
        }
    );
}

#[test]
fn test_storage_deserializes_from_tagged_table() {
    let storage: CheckpointStorage =
        serde_json::from_str(r#"{"storage":"filesystem","dir":"/tmp/cp"}"#).unwrap();
    assert_eq!(
        storage,
        CheckpointStorage::Filesystem {
            dir: "/tmp/cp".to_string()
        }
    );

    let storage: CheckpointStorage = serde_json::from_str(r#"{"storage":"memory"}"#).unwrap();
    assert_eq!(storage, CheckpointStorage::Memory);
}

// ============================================================================
// MemoryStore Tests
// ============================================================================

#[tokio::test]
async fn test_memory_store_read_missing() {
    let store = MemoryStore::new();
    assert!(store.read_checkpoint("orders").await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_store_keeps_latest_per_collection() {
    let store = MemoryStore::new();
    store
        .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("10")))
        .await
        .unwrap();
    store
        .store_checkpoint(&TickCheckpoint::new("users", Tick::from("11")))
        .await
        .unwrap();
    store
        .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("12")))
        .await
        .unwrap();

    let orders = store.read_checkpoint("orders").await.unwrap().unwrap();
    assert_eq!(orders.last_tick, Tick::from("12"));
    let users = store.read_checkpoint("users").await.unwrap().unwrap();
    assert_eq!(users.last_tick, Tick::from("11"));
    assert_eq!(store.history().await.len(), 3);
}

#[tokio::test]
async fn test_memory_store_seeded() {
    let store = MemoryStore::with_checkpoint(TickCheckpoint::new("orders", Tick::from("7")));
    let cp = store.read_checkpoint("orders").await.unwrap().unwrap();
    assert_eq!(cp.last_tick, Tick::from("7"));
    assert!(store.history().await.is_empty());
}

// ============================================================================
// FilesystemStore Tests
// ============================================================================

#[tokio::test]
async fn test_filesystem_store_missing_dir() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path().join("does-not-exist"));
    assert!(store.read_checkpoint("orders").await.unwrap().is_none());
}

#[tokio::test]
async fn test_filesystem_store_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path().join("checkpoints"));

    let original = TickCheckpoint::new("orders", Tick::from("987654321"));
    store.store_checkpoint(&original).await.unwrap();

    let loaded = store.read_checkpoint("orders").await.unwrap().unwrap();
    assert_eq!(loaded.collection, original.collection);
    assert_eq!(loaded.last_tick, original.last_tick);
    assert_eq!(
        loaded.updated_at.timestamp(),
        original.updated_at.timestamp()
    );
}

#[tokio::test]
async fn test_filesystem_store_overwrites() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());

    store
        .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("1")))
        .await
        .unwrap();
    store
        .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("2")))
        .await
        .unwrap();

    let loaded = store.read_checkpoint("orders").await.unwrap().unwrap();
    assert_eq!(loaded.last_tick, Tick::from("2"));

    let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(files.len(), 1, "temporary file must be renamed away");
}

#[tokio::test]
async fn test_filesystem_store_type_mismatch() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("checkpoint_orders.json"),
        r#"{"database_type":"mongodb","checkpoint":{"collection":"orders","last_tick":"1","updated_at":"2024-01-01T00:00:00Z"}}"#,
    )
    .unwrap();

    let store = FilesystemStore::new(tmp.path());
    let err = store.read_checkpoint("orders").await.unwrap_err();
    assert!(err.to_string().contains("type mismatch"));
}

#[tokio::test]
async fn test_filesystem_store_corrupt_file() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("checkpoint_orders.json"), "not json").unwrap();

    let store = FilesystemStore::new(tmp.path());
    assert!(store.read_checkpoint("orders").await.is_err());
}

//! Checkpoint store selection.

use std::sync::Arc;

use anyhow::Result;
use checkpoint::{CheckpointStorage, CheckpointStore, FilesystemStore, MemoryStore};
use elasticsearch_sink::{IndexCheckpointStore, IndexSink};

use crate::config::RiverConfig;

/// Open the checkpoint store configured for `config`.
///
/// Index-backed stores share `sink` with the Indexer and have their index
/// created here.
pub async fn open_checkpoint_store<K>(
    config: &RiverConfig,
    sink: Arc<K>,
) -> Result<Arc<dyn CheckpointStore>>
where
    K: IndexSink + 'static,
{
    tracing::info!("Checkpoints are kept in {}", config.checkpoint.describe());

    let store: Arc<dyn CheckpointStore> = match &config.checkpoint {
        CheckpointStorage::Index { index } => {
            let store = IndexCheckpointStore::new(sink, index.clone(), config.name.clone());
            store.ensure().await?;
            Arc::new(store)
        }
        CheckpointStorage::Filesystem { dir } => Arc::new(FilesystemStore::new(dir)),
        CheckpointStorage::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use checkpoint::TickCheckpoint;
    use elasticsearch_sink::MemoryIndex;
    use sync_core::Tick;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_index_storage_creates_checkpoint_index() {
        let index = Arc::new(MemoryIndex::new());
        let config = RiverConfig::for_river("orders");

        let store = open_checkpoint_store(&config, index.clone()).await.unwrap();
        assert!(index.index_exists("river-orders").await);

        store
            .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("9")))
            .await
            .unwrap();
        assert!(index.document("river-orders", "orders").await.is_some());
    }

    #[tokio::test]
    async fn test_filesystem_storage() {
        let tmp = TempDir::new().unwrap();
        let mut config = RiverConfig::for_river("orders");
        config.checkpoint = CheckpointStorage::Filesystem {
            dir: tmp.path().display().to_string(),
        };

        let store = open_checkpoint_store(&config, Arc::new(MemoryIndex::new()))
            .await
            .unwrap();
        store
            .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("9")))
            .await
            .unwrap();
        assert!(tmp.path().join("checkpoint_orders.json").exists());
    }

    #[tokio::test]
    async fn test_unreachable_index_fails() {
        let index = Arc::new(MemoryIndex::new());
        index.set_unavailable(true).await;
        let config = RiverConfig::for_river("orders");
        assert!(open_checkpoint_store(&config, index).await.is_err());
    }
}

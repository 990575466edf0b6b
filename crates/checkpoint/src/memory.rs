//! In-memory checkpoint storage.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{CheckpointStore, TickCheckpoint};

/// Process-local implementation of CheckpointStore.
///
/// Keeps every write in order so tests can assert on the checkpoint
/// history, not only on the latest value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    latest: HashMap<String, TickCheckpoint>,
    history: Vec<TickCheckpoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one checkpoint.
    pub fn with_checkpoint(checkpoint: TickCheckpoint) -> Self {
        let mut latest = HashMap::new();
        latest.insert(checkpoint.collection.clone(), checkpoint);
        Self {
            inner: Mutex::new(Inner {
                latest,
                history: Vec::new(),
            }),
        }
    }

    /// Every checkpoint written so far, oldest first.
    pub async fn history(&self) -> Vec<TickCheckpoint> {
        self.inner.lock().await.history.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn read_checkpoint(&self, collection: &str) -> Result<Option<TickCheckpoint>> {
        Ok(self.inner.lock().await.latest.get(collection).cloned())
    }

    async fn store_checkpoint(&self, checkpoint: &TickCheckpoint) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .latest
            .insert(checkpoint.collection.clone(), checkpoint.clone());
        inner.history.push(checkpoint.clone());
        Ok(())
    }
}

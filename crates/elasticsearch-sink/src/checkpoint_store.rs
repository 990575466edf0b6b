//! Checkpoints kept as documents of an index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint::{Checkpoint, CheckpointStore, TickCheckpoint};
use serde_json::{json, Value};
use sync_core::{Document, Tick};

use crate::IndexSink;

/// [`CheckpointStore`] writing one document per collection to `index`.
///
/// Document id is the collection name; the body looks like
/// `{"river": "...", "collection": "...", "arangodb": {"last_tick": "..."}, "updated_at": "..."}`.
pub struct IndexCheckpointStore<K: IndexSink> {
    sink: K,
    index: String,
    river: String,
}

impl<K: IndexSink> IndexCheckpointStore<K> {
    pub fn new(sink: K, index: impl Into<String>, river: impl Into<String>) -> Self {
        Self {
            sink,
            index: index.into(),
            river: river.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Create the checkpoint index if it is missing.
    pub async fn ensure(&self) -> Result<()> {
        self.sink
            .ensure_index(&self.index)
            .await
            .with_context(|| format!("Failed to create checkpoint index '{}'", self.index))
    }

    fn to_document(&self, checkpoint: &TickCheckpoint) -> Document {
        let mut document = Document::new();
        document.insert("river".to_string(), json!(self.river));
        document.insert("collection".to_string(), json!(checkpoint.collection));
        document.insert(
            TickCheckpoint::DATABASE_TYPE.to_string(),
            json!({ "last_tick": checkpoint.last_tick }),
        );
        document.insert(
            "updated_at".to_string(),
            json!(checkpoint.updated_at.to_rfc3339()),
        );
        document
    }

    fn from_document(collection: &str, document: &Document) -> Result<TickCheckpoint> {
        let last_tick = document
            .get(TickCheckpoint::DATABASE_TYPE)
            .and_then(|source| source.get("last_tick"))
            .and_then(|tick| match tick {
                Value::String(s) => Some(Tick::new(s.clone())),
                Value::Number(n) => Some(Tick::new(n.to_string())),
                _ => None,
            })
            .with_context(|| {
                format!(
                    "Checkpoint document '{collection}' has no {}.last_tick",
                    TickCheckpoint::DATABASE_TYPE
                )
            })?;

        let updated_at = match document.get("updated_at").and_then(Value::as_str) {
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .with_context(|| format!("Invalid updated_at '{ts}' in checkpoint '{collection}'"))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(TickCheckpoint {
            collection: collection.to_string(),
            last_tick,
            updated_at,
        })
    }
}

#[async_trait]
impl<K: IndexSink> CheckpointStore for IndexCheckpointStore<K> {
    async fn read_checkpoint(&self, collection: &str) -> Result<Option<TickCheckpoint>> {
        let document = self
            .sink
            .get_document(&self.index, collection)
            .await
            .with_context(|| {
                format!(
                    "Failed to read checkpoint of '{collection}' from index '{}'",
                    self.index
                )
            })?;

        match document {
            Some(document) => Ok(Some(Self::from_document(collection, &document)?)),
            None => Ok(None),
        }
    }

    async fn store_checkpoint(&self, checkpoint: &TickCheckpoint) -> Result<()> {
        let document = self.to_document(checkpoint);
        self.sink
            .put_document(&self.index, &checkpoint.collection, &document)
            .await
            .with_context(|| {
                format!(
                    "Failed to write checkpoint {} to index '{}'",
                    checkpoint.to_cli_string(),
                    self.index
                )
            })?;
        tracing::debug!(
            "Stored checkpoint {} in index '{}'",
            checkpoint.to_cli_string(),
            self.index
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::MemoryIndex;

    #[tokio::test]
    async fn test_roundtrip_through_index() {
        let index = Arc::new(MemoryIndex::new());
        let store = IndexCheckpointStore::new(index.clone(), "river-orders", "orders");
        store.ensure().await.unwrap();

        assert!(store.read_checkpoint("orders").await.unwrap().is_none());

        let cp = TickCheckpoint::new("orders", Tick::from("42"));
        store.store_checkpoint(&cp).await.unwrap();

        let loaded = store.read_checkpoint("orders").await.unwrap().unwrap();
        assert_eq!(loaded.last_tick, Tick::from("42"));
        assert_eq!(loaded.updated_at.timestamp(), cp.updated_at.timestamp());

        let raw = index.document("river-orders", "orders").await.unwrap();
        assert_eq!(raw["river"], json!("orders"));
        assert_eq!(raw["arangodb"]["last_tick"], json!("42"));
    }

    #[tokio::test]
    async fn test_numeric_tick_is_accepted() {
        let index = Arc::new(MemoryIndex::new());
        let mut document = Document::new();
        document.insert("arangodb".to_string(), json!({ "last_tick": 1234 }));
        index.seed("river-orders", "orders", document).await;

        let store = IndexCheckpointStore::new(index, "river-orders", "orders");
        let loaded = store.read_checkpoint("orders").await.unwrap().unwrap();
        assert_eq!(loaded.last_tick, Tick::from("1234"));
    }

    #[tokio::test]
    async fn test_malformed_document_is_an_error() {
        let index = Arc::new(MemoryIndex::new());
        index.seed("river-orders", "orders", Document::new()).await;

        let store = IndexCheckpointStore::new(index, "river-orders", "orders");
        assert!(store.read_checkpoint("orders").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_index_is_an_error() {
        let index = Arc::new(MemoryIndex::new());
        index.set_unavailable(true).await;

        let store = IndexCheckpointStore::new(index, "river-orders", "orders");
        assert!(store.read_checkpoint("orders").await.is_err());
        assert!(store
            .store_checkpoint(&TickCheckpoint::new("orders", Tick::from("1")))
            .await
            .is_err());
    }
}

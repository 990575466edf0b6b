//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus the checkpoint record itself.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::Tick;

use crate::Checkpoint;

/// Last applied WAL position of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickCheckpoint {
    /// Source collection the tick belongs to
    pub collection: String,
    /// Tick of the last durably applied event
    pub last_tick: Tick,
    /// When this checkpoint was written
    pub updated_at: DateTime<Utc>,
}

impl TickCheckpoint {
    pub fn new(collection: impl Into<String>, last_tick: Tick) -> Self {
        Self {
            collection: collection.into(),
            last_tick,
            updated_at: Utc::now(),
        }
    }
}

impl Checkpoint for TickCheckpoint {
    const DATABASE_TYPE: &'static str = "arangodb";

    fn to_cli_string(&self) -> String {
        format!("{}:{}", self.collection, self.last_tick)
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        // Collection names never contain ':', ticks might in other sources,
        // so split on the first separator.
        let (collection, tick) = s
            .split_once(':')
            .with_context(|| format!("Invalid checkpoint '{s}': expected 'collection:tick'"))?;

        if collection.trim().is_empty() || tick.trim().is_empty() {
            anyhow::bail!("Invalid checkpoint '{s}': collection and tick must not be empty");
        }

        Ok(Self::new(collection.trim(), Tick::new(tick.trim())))
    }
}

/// Trait for checkpoint storage operations.
///
/// This trait abstracts the storage backend for checkpoint operations,
/// allowing the same river logic to work with:
/// - In-memory storage (`MemoryStore`)
/// - Filesystem storage (`FilesystemStore`)
/// - The target index itself (`IndexCheckpointStore` in elasticsearch-sink)
///
/// The Indexer is the only writer; the river reads once at startup.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint of a collection.
    ///
    /// Returns None if no checkpoint was ever written for it.
    async fn read_checkpoint(&self, collection: &str) -> Result<Option<TickCheckpoint>>;

    /// Replace the checkpoint of `checkpoint.collection`.
    async fn store_checkpoint(&self, checkpoint: &TickCheckpoint) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for std::sync::Arc<T> {
    async fn read_checkpoint(&self, collection: &str) -> Result<Option<TickCheckpoint>> {
        (**self).read_checkpoint(collection).await
    }

    async fn store_checkpoint(&self, checkpoint: &TickCheckpoint) -> Result<()> {
        (**self).store_checkpoint(checkpoint).await
    }
}

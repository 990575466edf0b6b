//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::{CheckpointStore, TickCheckpoint};
use crate::Checkpoint;

/// On-disk envelope of a checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    database_type: String,
    checkpoint: TickCheckpoint,
}

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one JSON file per collection, `checkpoint_{collection}.json`,
/// replaced atomically through a temporary file and a rename.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("checkpoint_{collection}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn read_checkpoint(&self, collection: &str) -> Result<Option<TickCheckpoint>> {
        let path = self.path_for(collection);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read checkpoint {}", path.display()))
            }
        };

        let stored: StoredCheckpoint = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file {}", path.display()))?;

        if stored.database_type != TickCheckpoint::DATABASE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch in {}: expected '{}', found '{}'",
                path.display(),
                TickCheckpoint::DATABASE_TYPE,
                stored.database_type
            );
        }

        Ok(Some(stored.checkpoint))
    }

    async fn store_checkpoint(&self, checkpoint: &TickCheckpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stored = StoredCheckpoint {
            database_type: TickCheckpoint::DATABASE_TYPE.to_string(),
            checkpoint: checkpoint.clone(),
        };

        let path = self.path_for(&checkpoint.collection);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&stored)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            "Stored checkpoint {} to {}",
            checkpoint.to_cli_string(),
            path.display()
        );
        Ok(())
    }
}

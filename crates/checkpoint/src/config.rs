//! Checkpoint storage selection.

use serde::{Deserialize, Serialize};

/// Where the river keeps its checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum CheckpointStorage {
    /// A reserved document per collection inside the target index.
    Index {
        /// Index holding the checkpoint documents.
        index: String,
    },

    /// One JSON file per collection.
    Filesystem {
        /// Directory holding the checkpoint files.
        dir: String,
    },

    /// Kept in process memory only; lost on restart.
    Memory,
}

impl CheckpointStorage {
    /// Default checkpoint index for a river.
    pub fn default_index(river_name: &str) -> Self {
        Self::Index {
            index: format!("river-{river_name}"),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CheckpointStorage::Index { index } => format!("index '{index}'"),
            CheckpointStorage::Filesystem { dir } => format!("directory '{dir}'"),
            CheckpointStorage::Memory => "memory".to_string(),
        }
    }
}

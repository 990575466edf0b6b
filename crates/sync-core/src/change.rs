//! Normalized change events.

use serde::{Deserialize, Serialize};

use crate::Tick;

/// A JSON document body as read from the source and written to the index.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Kind of mutation recorded by a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One WAL entry, normalized for the Indexer.
///
/// Events of one collection travel through the pipeline in non-decreasing
/// `tick` order; nothing downstream of the Slurper reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub tick: Tick,
    pub collection: String,
    pub operation: ChangeOp,
    pub key: String,
    /// Full document for insert/update, `None` for delete.
    pub document: Option<Document>,
}

impl ChangeEvent {
    pub fn insert(
        tick: impl Into<Tick>,
        collection: impl Into<String>,
        key: impl Into<String>,
        document: Document,
    ) -> Self {
        Self {
            tick: tick.into(),
            collection: collection.into(),
            operation: ChangeOp::Insert,
            key: key.into(),
            document: Some(document),
        }
    }

    pub fn update(
        tick: impl Into<Tick>,
        collection: impl Into<String>,
        key: impl Into<String>,
        document: Document,
    ) -> Self {
        Self {
            operation: ChangeOp::Update,
            ..Self::insert(tick, collection, key, document)
        }
    }

    pub fn delete(
        tick: impl Into<Tick>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            tick: tick.into(),
            collection: collection.into(),
            operation: ChangeOp::Delete,
            key: key.into(),
            document: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.operation == ChangeOp::Delete
    }
}

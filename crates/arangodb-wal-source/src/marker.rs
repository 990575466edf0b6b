//! ArangoDB WAL markers and their mapping to change events.

use serde_json::Value;
use sync_core::{ChangeEvent, Document, Tick};

use crate::SourceError;

/// Collection dropped.
pub const MARKER_DROP_COLLECTION: u32 = 2001;
/// Collection truncated.
pub const MARKER_TRUNCATE_COLLECTION: u32 = 2004;
/// Document inserted, replaced or updated.
pub const MARKER_DOCUMENT: u32 = 2300;
/// Document removed.
pub const MARKER_REMOVE: u32 = 2302;

/// Identity of the followed collection as reported by the server.
///
/// WAL markers name their collection in different ways across server
/// versions, so every known identifier is kept for matching.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    pub name: String,
    /// Numeric collection id.
    pub id: Option<String>,
    /// Globally unique id (`cuid` in markers).
    pub globally_unique_id: Option<String>,
}

impl CollectionInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One line of a `/_api/wal/tail` response.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub tick: Tick,
    pub marker_type: u32,
    /// Collection name, when the server includes it.
    pub cname: Option<String>,
    pub cuid: Option<String>,
    pub cid: Option<String>,
    /// Old revision, present on some servers for updates.
    pub old_rev: Option<String>,
    pub data: Option<Document>,
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl WalEntry {
    /// Document marker as written by the server for `collection`.
    pub fn document(tick: impl Into<Tick>, collection: &str, data: Document) -> Self {
        Self {
            tick: tick.into(),
            marker_type: MARKER_DOCUMENT,
            cname: Some(collection.to_string()),
            cuid: None,
            cid: None,
            old_rev: None,
            data: Some(data),
        }
    }

    pub fn remove(tick: impl Into<Tick>, collection: &str, key: &str) -> Self {
        let mut data = Document::new();
        data.insert("_key".to_string(), Value::String(key.to_string()));
        Self {
            marker_type: MARKER_REMOVE,
            ..Self::document(tick, collection, data)
        }
    }

    pub fn collection_marker(tick: impl Into<Tick>, marker_type: u32, collection: &str) -> Self {
        Self {
            marker_type,
            data: None,
            ..Self::document(tick, collection, Document::new())
        }
    }

    /// Parse one JSON line of a tail response.
    pub fn from_json(value: &Value) -> Result<Self, SourceError> {
        let tick = string_field(value, "tick")
            .ok_or_else(|| SourceError::Fatal(format!("WAL marker without tick: {value}")))?;
        let marker_type = value
            .get("type")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .ok_or_else(|| SourceError::Fatal(format!("WAL marker without type: {value}")))?;

        let data = value.get("data").and_then(Value::as_object).cloned();
        let old_rev = string_field(value, "oldRev")
            .or_else(|| data.as_ref().and_then(|d| d.get("_oldRev")).and_then(Value::as_str).map(str::to_string));

        Ok(Self {
            tick: Tick::new(tick),
            marker_type,
            cname: string_field(value, "cname"),
            cuid: string_field(value, "cuid"),
            cid: string_field(value, "cid"),
            old_rev,
            data,
        })
    }

    fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }

    /// Whether this marker concerns `collection`.
    pub fn belongs_to(&self, collection: &CollectionInfo) -> bool {
        if let Some(cname) = &self.cname {
            return *cname == collection.name;
        }
        if let (Some(cuid), Some(expected)) = (&self.cuid, &collection.globally_unique_id) {
            return cuid == expected;
        }
        if let (Some(cid), Some(expected)) = (&self.cid, &collection.id) {
            return cid == expected;
        }
        // Document markers carry "<collection>/<key>" in _id, collection
        // markers carry the name.
        if let Some(id) = self.data_str("_id") {
            return id.split_once('/').map(|(c, _)| c) == Some(collection.name.as_str());
        }
        self.data_str("name") == Some(collection.name.as_str())
    }

    /// Map this marker onto the followed collection.
    pub fn decode(self, collection: &CollectionInfo) -> Decoded {
        if !self.belongs_to(collection) {
            return Decoded::Skip;
        }

        match self.marker_type {
            MARKER_DOCUMENT | MARKER_REMOVE => {}
            MARKER_DROP_COLLECTION => return Decoded::CollectionDropped,
            MARKER_TRUNCATE_COLLECTION => return Decoded::CollectionTruncated,
            _ => return Decoded::Skip,
        }

        let Some(key) = self.data_str("_key").map(str::to_string) else {
            return Decoded::Skip;
        };

        let event = if self.marker_type == MARKER_REMOVE {
            ChangeEvent::delete(self.tick, collection.name.clone(), key)
        } else {
            let document = self.data.unwrap_or_default();
            if self.old_rev.is_some() {
                ChangeEvent::update(self.tick, collection.name.clone(), key, document)
            } else {
                ChangeEvent::insert(self.tick, collection.name.clone(), key, document)
            }
        };
        Decoded::Change(event)
    }
}

/// What a marker means for the followed collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Change(ChangeEvent),
    CollectionDropped,
    CollectionTruncated,
    /// Another collection, another marker type, or nothing usable.
    Skip,
}

//! Bulk request and response model.

use serde_json::{json, Value};
use sync_core::Document;

use crate::error::{is_retryable_status, SinkError};

/// Write action of one bulk item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    /// Create or fully replace the document.
    Index,
    /// Remove the document; removing a missing document succeeds.
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Delete => "delete",
        }
    }
}

/// One item of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub index: String,
    /// Mapping type, only sent when configured (pre-7.x clusters).
    pub doc_type: Option<String>,
    pub id: String,
    /// Body for `Index`, `None` for `Delete`.
    pub document: Option<Document>,
}

impl BulkOperation {
    pub fn index(
        index: impl Into<String>,
        doc_type: Option<String>,
        id: impl Into<String>,
        document: Document,
    ) -> Self {
        Self {
            action: BulkAction::Index,
            index: index.into(),
            doc_type,
            id: id.into(),
            document: Some(document),
        }
    }

    pub fn delete(index: impl Into<String>, doc_type: Option<String>, id: impl Into<String>) -> Self {
        Self {
            action: BulkAction::Delete,
            index: index.into(),
            doc_type,
            id: id.into(),
            document: None,
        }
    }

    /// Append the NDJSON lines of this item to `body`.
    pub(crate) fn write_ndjson(&self, body: &mut String) -> Result<(), SinkError> {
        let mut meta = json!({ "_index": self.index, "_id": self.id });
        if let Some(doc_type) = &self.doc_type {
            meta["_type"] = Value::String(doc_type.clone());
        }
        let mut header = serde_json::Map::new();
        header.insert(self.action.as_str().to_string(), meta);
        let header = Value::Object(header);

        body.push_str(&encode(&header)?);
        body.push('\n');
        if self.action == BulkAction::Index {
            let document = self.document.clone().unwrap_or_default();
            body.push_str(&encode(&Value::Object(document))?);
            body.push('\n');
        }
        Ok(())
    }
}

fn encode(value: &Value) -> Result<String, SinkError> {
    serde_json::to_string(value).map_err(|e| SinkError::Fatal(format!("Failed to encode bulk item: {e}")))
}

/// Build the `_bulk` request body.
pub(crate) fn to_ndjson(operations: &[BulkOperation]) -> Result<String, SinkError> {
    let mut body = String::new();
    for op in operations {
        op.write_ndjson(&mut body)?;
    }
    Ok(body)
}

/// Result of one bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Applied,
    /// Rejected for a reason that may go away (429, 5xx).
    Retryable { status: u16, reason: String },
    /// Rejected for good, e.g. a mapping conflict.
    Rejected { status: u16, reason: String },
}

impl ItemOutcome {
    pub(crate) fn from_status(action: BulkAction, status: u16, reason: String) -> Self {
        match status {
            200..=299 => ItemOutcome::Applied,
            404 if action == BulkAction::Delete => ItemOutcome::Applied,
            s if is_retryable_status(s) => ItemOutcome::Retryable { status, reason },
            _ => ItemOutcome::Rejected { status, reason },
        }
    }
}

/// Per-item outcomes of one bulk request, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<ItemOutcome>,
}

impl BulkResponse {
    pub fn all_applied(count: usize) -> Self {
        Self {
            items: vec![ItemOutcome::Applied; count],
        }
    }

    pub fn has_retryable(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, ItemOutcome::Retryable { .. }))
    }

    /// Parse an Elasticsearch `_bulk` response body.
    pub(crate) fn parse(body: &Value, operations: &[BulkOperation]) -> Result<Self, SinkError> {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SinkError::Fatal("Bulk response has no 'items' array".to_string()))?;

        if items.len() != operations.len() {
            return Err(SinkError::Fatal(format!(
                "Bulk response has {} items for {} operations",
                items.len(),
                operations.len()
            )));
        }

        let outcomes = items
            .iter()
            .zip(operations)
            .map(|(item, op)| {
                let result = item.get(op.action.as_str()).unwrap_or(item);
                let status = result
                    .get("status")
                    .and_then(Value::as_u64)
                    .unwrap_or(500) as u16;
                let reason = result
                    .get("error")
                    .map(|e| match e.get("reason").and_then(Value::as_str) {
                        Some(reason) => reason.to_string(),
                        None => e.to_string(),
                    })
                    .unwrap_or_default();
                ItemOutcome::from_status(op.action, status, reason)
            })
            .collect();

        Ok(Self { items: outcomes })
    }
}

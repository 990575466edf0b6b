//! Document transformation hooks.
//!
//! A [`Script`] sees every insert/update document before it is indexed and
//! may rewrite it or drop the event. Excluded fields are stripped after the
//! script ran, so a script can still read `_key` or `_rev`.

use sync_core::{ChangeEvent, Document};

/// Per-document transformation.
///
/// Returning `Ok(None)` drops the event; it still counts as processed for
/// checkpointing. An `Err` is a permanent document error: the event is
/// skipped with a warning.
pub trait Script: Send + Sync {
    fn transform(&self, event: &ChangeEvent, document: Document) -> anyhow::Result<Option<Document>>;
}

/// [`Script`] implemented by a closure.
///
/// ```
/// use arangodb_river::script::{FnScript, Script};
/// use sync_core::{ChangeEvent, Document};
///
/// let script = FnScript::new(|_event: &ChangeEvent, mut doc: Document| {
///     doc.insert("source".to_string(), "arangodb".into());
///     Ok(Some(doc))
/// });
/// let event = ChangeEvent::insert("1", "orders", "a", Document::new());
/// let out = script.transform(&event, Document::new()).unwrap().unwrap();
/// assert_eq!(out["source"], "arangodb");
/// ```
pub struct FnScript<F>(F);

impl<F> FnScript<F>
where
    F: Fn(&ChangeEvent, Document) -> anyhow::Result<Option<Document>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Script for FnScript<F>
where
    F: Fn(&ChangeEvent, Document) -> anyhow::Result<Option<Document>> + Send + Sync,
{
    fn transform(&self, event: &ChangeEvent, document: Document) -> anyhow::Result<Option<Document>> {
        (self.0)(event, document)
    }
}

/// Remove top-level `fields` from `document`.
pub fn strip_excluded(document: &mut Document, fields: &[String]) {
    for field in fields {
        document.remove(field);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_strip_excluded_is_top_level_only() {
        let mut document = doc(json!({
            "_key": "a", "_id": "orders/a", "_rev": "_x",
            "total": 3,
            "nested": {"_key": "kept"}
        }));
        let fields: Vec<String> = ["_id", "_key", "_rev", "missing"]
            .iter()
            .map(|f| f.to_string())
            .collect();

        strip_excluded(&mut document, &fields);
        assert_eq!(document, doc(json!({"total": 3, "nested": {"_key": "kept"}})));
    }

    #[test]
    fn test_fn_script_can_drop_and_fail() {
        let script = FnScript::new(|event: &ChangeEvent, document: Document| {
            match event.key.as_str() {
                "drop" => Ok(None),
                "bad" => anyhow::bail!("cannot transform"),
                _ => Ok(Some(document)),
            }
        });

        let keep = ChangeEvent::insert("1", "orders", "keep", Document::new());
        let drop = ChangeEvent::insert("2", "orders", "drop", Document::new());
        let bad = ChangeEvent::insert("3", "orders", "bad", Document::new());

        assert!(script.transform(&keep, Document::new()).unwrap().is_some());
        assert!(script.transform(&drop, Document::new()).unwrap().is_none());
        assert!(script.transform(&bad, Document::new()).is_err());
    }
}

//! In-memory [`IndexSink`] for tests.
//!
//! Applies bulk requests to a map of indices and records every attempt, so
//! tests can assert on batch sizes and retries. Failures can be injected per
//! request or per document id.

use std::collections::{BTreeMap, HashMap, HashSet};

use sync_core::Document;
use tokio::sync::Mutex;

use crate::{BulkAction, BulkOperation, BulkResponse, IndexSink, ItemOutcome, SinkError};

/// One recorded bulk request.
#[derive(Debug, Clone)]
pub struct BulkAttempt {
    pub operations: Vec<BulkOperation>,
    /// `None` when the whole request was refused.
    pub response: Option<BulkResponse>,
}

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, BTreeMap<String, Document>>,
    attempts: Vec<BulkAttempt>,
    fail_bulks: usize,
    busy_ids: HashMap<String, usize>,
    rejected_ids: HashSet<String>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    inner: Mutex<Inner>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` bulk requests as a whole with a transient error.
    pub async fn fail_next_bulks(&self, n: usize) {
        self.inner.lock().await.fail_bulks = n;
    }

    /// Answer 429 for `id` on its next `n` bulk items.
    pub async fn busy_id(&self, id: impl Into<String>, n: usize) {
        self.inner.lock().await.busy_ids.insert(id.into(), n);
    }

    /// Always answer 400 for `id`.
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.inner.lock().await.rejected_ids.insert(id.into());
    }

    /// Make every call fail with a transient error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// Put a document directly, bypassing the journal.
    pub async fn seed(&self, index: &str, id: &str, document: Document) {
        self.inner
            .lock()
            .await
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    pub async fn index_exists(&self, index: &str) -> bool {
        self.inner.lock().await.indices.contains_key(index)
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Document> {
        self.inner
            .lock()
            .await
            .indices
            .get(index)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// All documents of `index`, ordered by id.
    pub async fn documents(&self, index: &str) -> BTreeMap<String, Document> {
        self.inner
            .lock()
            .await
            .indices
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn attempts(&self) -> Vec<BulkAttempt> {
        self.inner.lock().await.attempts.clone()
    }

    /// Sizes of the bulk requests that were accepted by the index.
    pub async fn accepted_batch_sizes(&self) -> Vec<usize> {
        self.inner
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.response.is_some())
            .map(|a| a.operations.len())
            .collect()
    }
}

fn unavailable() -> SinkError {
    SinkError::Transient("memory index unavailable".to_string())
}

#[async_trait::async_trait]
impl IndexSink for MemoryIndex {
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(unavailable());
        }
        inner.indices.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(unavailable());
        }
        inner.indices.remove(index);
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable || inner.fail_bulks > 0 {
            inner.fail_bulks = inner.fail_bulks.saturating_sub(1);
            inner.attempts.push(BulkAttempt {
                operations: operations.to_vec(),
                response: None,
            });
            return Err(SinkError::Transient("bulk request refused".to_string()));
        }

        let mut items = Vec::with_capacity(operations.len());
        for op in operations {
            if inner.rejected_ids.contains(&op.id) {
                items.push(ItemOutcome::Rejected {
                    status: 400,
                    reason: format!("document '{}' rejected", op.id),
                });
                continue;
            }
            if let Some(remaining) = inner.busy_ids.get_mut(&op.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    items.push(ItemOutcome::Retryable {
                        status: 429,
                        reason: "too many requests".to_string(),
                    });
                    continue;
                }
            }

            let docs = inner.indices.entry(op.index.clone()).or_default();
            match op.action {
                BulkAction::Index => {
                    docs.insert(op.id.clone(), op.document.clone().unwrap_or_default());
                }
                BulkAction::Delete => {
                    docs.remove(&op.id);
                }
            }
            items.push(ItemOutcome::Applied);
        }

        let response = BulkResponse { items };
        inner.attempts.push(BulkAttempt {
            operations: operations.to_vec(),
            response: Some(response.clone()),
        });
        Ok(response)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, SinkError> {
        let inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(unavailable());
        }
        Ok(inner.indices.get(index).and_then(|docs| docs.get(id).cloned()))
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(unavailable());
        }
        inner
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }
}

//! IndexSink trait definition.
//!
//! This trait abstracts the target search index, allowing the Indexer and
//! the river controller to be compiled against a single interface that
//! works with a real cluster or with the in-memory index of the tests.

use std::sync::Arc;

use sync_core::Document;

use crate::{BulkOperation, BulkResponse, SinkError};

/// Trait for writing to the target index.
///
/// # Usage Pattern
///
/// The Indexer is generic over the sink for static dispatch:
///
/// ```ignore
/// pub struct Indexer<K: IndexSink, C: CheckpointStore> { sink: K, ... }
///
/// let response = self.sink.bulk(&operations).await?;
/// ```
#[async_trait::async_trait]
pub trait IndexSink: Send + Sync {
    /// Create the index unless it already exists.
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError>;

    /// Delete the index; deleting a missing index succeeds.
    async fn delete_index(&self, index: &str) -> Result<(), SinkError>;

    /// Submit operations as one bulk request.
    ///
    /// `Err` means the request as a whole failed and nothing may be assumed
    /// applied. `Ok` carries one outcome per operation, in order.
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, SinkError>;

    /// Point lookup of a document source.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, SinkError>;

    /// Create or replace a single document.
    async fn put_document(&self, index: &str, id: &str, document: &Document)
        -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<T: IndexSink + ?Sized> IndexSink for Arc<T> {
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError> {
        (**self).ensure_index(index).await
    }

    async fn delete_index(&self, index: &str) -> Result<(), SinkError> {
        (**self).delete_index(index).await
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, SinkError> {
        (**self).bulk(operations).await
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, SinkError> {
        (**self).get_document(index, id).await
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), SinkError> {
        (**self).put_document(index, id, document).await
    }
}

//! WalSource trait definition.

use std::sync::Arc;

use sync_core::{Document, Tick};

use crate::{CollectionInfo, SourceError, WalEntry};

/// Result of one WAL poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailBatch {
    /// Markers with ticks after the requested start, in log order.
    pub entries: Vec<WalEntry>,
    /// Highest tick covered by this response, when the server reports one.
    pub last_included: Option<Tick>,
    /// `false` when the requested start tick is no longer retained.
    pub from_present: bool,
    /// More data is available right now.
    pub check_more: bool,
}

/// One page of a full collection scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub documents: Vec<Document>,
    /// Cursor to fetch the next page from; `None` on the last page.
    pub cursor: Option<String>,
}

/// Read access to the source write-ahead log.
///
/// The Slurper is generic over this trait; `ArangoWalSource` implements it
/// over HTTP and `testing::MemoryWal` in memory.
#[async_trait::async_trait]
pub trait WalSource: Send + Sync {
    /// Resolve the followed collection; fatal when it does not exist.
    async fn check_collection(&self, collection: &str) -> Result<CollectionInfo, SourceError>;

    /// Fetch markers with tick greater than `from`.
    async fn tail(&self, from: &Tick) -> Result<TailBatch, SourceError>;

    /// Tick of the newest WAL entry.
    async fn current_tick(&self) -> Result<Tick, SourceError>;

    /// Start a full scan of `collection` returning pages of `batch_size`.
    async fn open_scan(&self, collection: &str, batch_size: usize)
        -> Result<ScanPage, SourceError>;

    async fn next_scan_page(&self, cursor: &str) -> Result<ScanPage, SourceError>;

    /// Release a scan cursor before it is exhausted.
    async fn close_scan(&self, cursor: &str) -> Result<(), SourceError>;

    /// Release connections; later calls may fail.
    async fn close(&self);
}

#[async_trait::async_trait]
impl<T: WalSource + ?Sized> WalSource for Arc<T> {
    async fn check_collection(&self, collection: &str) -> Result<CollectionInfo, SourceError> {
        (**self).check_collection(collection).await
    }

    async fn tail(&self, from: &Tick) -> Result<TailBatch, SourceError> {
        (**self).tail(from).await
    }

    async fn current_tick(&self) -> Result<Tick, SourceError> {
        (**self).current_tick().await
    }

    async fn open_scan(
        &self,
        collection: &str,
        batch_size: usize,
    ) -> Result<ScanPage, SourceError> {
        (**self).open_scan(collection, batch_size).await
    }

    async fn next_scan_page(&self, cursor: &str) -> Result<ScanPage, SourceError> {
        (**self).next_scan_page(cursor).await
    }

    async fn close_scan(&self, cursor: &str) -> Result<(), SourceError> {
        (**self).close_scan(cursor).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

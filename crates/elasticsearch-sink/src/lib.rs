//! Elasticsearch sink for arangodb-river.
//!
//! The `IndexSink` trait abstracts the target index so the Indexer and the
//! river controller never touch HTTP directly. `ElasticsearchSink` talks to
//! a cluster through the `_bulk` and document APIs; `MemoryIndex` is an
//! in-memory stand-in with failure injection, used by the test suites.
//!
//! Checkpoints can live inside the target index as well: see
//! `IndexCheckpointStore`.

mod bulk;
mod checkpoint_store;
mod elasticsearch;
mod error;
pub mod memory;
mod traits;

pub use bulk::{BulkAction, BulkOperation, BulkResponse, ItemOutcome};
pub use checkpoint_store::IndexCheckpointStore;
pub use elasticsearch::{ElasticsearchOpts, ElasticsearchSink};
pub use error::SinkError;
pub use memory::{BulkAttempt, MemoryIndex};
pub use traits::IndexSink;

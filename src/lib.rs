//! ArangoDB river library
//!
//! Replicates one ArangoDB collection into an Elasticsearch index by
//! tailing the server's write-ahead log.
//!
//! # Architecture
//!
//! ```text
//!  ArangoDB WAL ──► Slurper ──► hand-off queue ──► Indexer ──► Elasticsearch _bulk
//!                                                     │
//!                                                     └──► CheckpointStore
//! ```
//!
//! - The Slurper (in `arangodb-wal-source`) polls `/_api/wal/tail`, backs
//!   off while the log is idle and falls back to a full collection scan when
//!   its start tick was purged.
//! - The [`Indexer`] batches events into bulk requests, retries failures and
//!   advances the checkpoint only after the target acknowledged a batch.
//! - The [`River`] runs the startup checks, spawns both units and stops
//!   them on `close`.
//!
//! # CLI Usage
//!
//! ```bash
//! # Run a river until Ctrl-C
//! arangodb-river run --config river.toml
//!
//! # Replay the whole collection, ignoring the checkpoint
//! arangodb-river run --config river.toml --full-sync
//!
//! # Inspect or move the checkpoint
//! arangodb-river checkpoint show --config river.toml
//! arangodb-river checkpoint set --config river.toml orders:123456
//! ```

pub mod config;
pub mod indexer;
pub mod river;
pub mod script;
pub mod storage;

pub use config::{ConfigError, RiverConfig};
pub use indexer::{Indexer, IndexerOpts, IndexerStats};
pub use river::{River, RiverError};
pub use script::{FnScript, Script};
pub use storage::open_checkpoint_store;

//! Checkpoint management for arangodb-river
//!
//! A checkpoint records, per source collection, the tick of the last WAL
//! entry whose effects are durably applied to the target index. It is read
//! once when the river starts and rewritten by the Indexer after every
//! acknowledged bulk request.
//!
//! # Architecture
//!
//! - The `Checkpoint` trait gives a checkpoint type its CLI string form
//! - `TickCheckpoint` is the single checkpoint type of the river
//! - The `CheckpointStore` trait abstracts where checkpoints live
//!
//! ## Storage Backends
//!
//! - `MemoryStore` - process-local map, used by tests and dry runs
//! - `FilesystemStore` - one JSON file per collection
//! - `IndexCheckpointStore` - a reserved document in the target index (in the
//!   elasticsearch-sink crate)

mod config;
mod filesystem;
mod memory;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::CheckpointStorage;
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::{CheckpointStore, TickCheckpoint};

/// Trait for checkpoint types that can be passed on the command line.
///
/// # Example
///
/// ```rust
/// use checkpoint::{Checkpoint, TickCheckpoint};
///
/// let cp = TickCheckpoint::from_cli_string("orders:12345").unwrap();
/// assert_eq!(cp.collection, "orders");
/// assert_eq!(cp.to_cli_string(), "orders:12345");
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Source database identifier, stored alongside the checkpoint.
    const DATABASE_TYPE: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

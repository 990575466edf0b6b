//! ArangoDB write-ahead log source for arangodb-river.
//!
//! The [`Slurper`] is the producing half of a river: it tails the WAL of one
//! collection through a [`WalSource`] and pushes normalized change events
//! onto the hand-off queue.
//!
//! ```ignore
//! use arangodb_wal_source::{ArangoOpts, ArangoWalSource, Slurper, SlurperOpts, WalSource};
//!
//! let source = ArangoWalSource::new(ArangoOpts::default())?;
//! let collection = source.check_collection("orders").await?;
//! let slurper = Slurper::new(source, sender, collection, Tick::origin(), SlurperOpts::default());
//! slurper.run(cancel).await?;
//! ```

mod arangodb;
mod error;
mod marker;
mod slurper;
mod traits;

// Make testing module available for integration tests
#[doc(hidden)]
pub mod testing;

pub use arangodb::{ArangoOpts, ArangoWalSource};
pub use error::SourceError;
pub use marker::{
    CollectionInfo, Decoded, WalEntry, MARKER_DOCUMENT, MARKER_DROP_COLLECTION, MARKER_REMOVE,
    MARKER_TRUNCATE_COLLECTION,
};
pub use slurper::{Slurper, SlurperOpts};
pub use traits::{ScanPage, TailBatch, WalSource};

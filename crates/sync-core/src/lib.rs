//! Core types for the arangodb-river pipeline.
//!
//! This crate sits at the bottom of the workspace and is shared by the
//! source, sink, checkpoint and river crates:
//!
//! - [`Tick`] - opaque, totally ordered WAL position
//! - [`ChangeEvent`] / [`ChangeOp`] - one normalized WAL entry
//! - [`handoff`] - the bounded single-producer/single-consumer queue between
//!   the Slurper and the Indexer
//! - [`Backoff`] - the doubling wait policy shared by both units
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint              (TickCheckpoint wraps Tick)
//!    ├─── arangodb-wal-source     (produces ChangeEvent)
//!    ├─── elasticsearch-sink      (consumes Document)
//!    └─── arangodb-river          (Indexer, River controller)
//! ```

pub mod backoff;
pub mod change;
pub mod queue;
pub mod tick;

pub use backoff::Backoff;
pub use change::{ChangeEvent, ChangeOp, Document};
pub use queue::{handoff, Pop, PushError, QueueCapacity, QueueReceiver, QueueSender};
pub use tick::Tick;

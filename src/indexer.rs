//! The Indexer: the consumer half of the river.
//!
//! Pops change events off the hand-off queue, turns them into bulk
//! operations and flushes them to the target index when the batch is full,
//! when `bulk_timeout` elapsed since its first event, or on shutdown. After
//! every acknowledged flush the checkpoint of each collection in the batch
//! moves to the highest tick the batch processed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use checkpoint::{Checkpoint, CheckpointStore, TickCheckpoint};
use elasticsearch_sink::{BulkAction, BulkOperation, IndexSink, ItemOutcome};
use sync_core::{Backoff, ChangeEvent, ChangeOp, Pop, QueueReceiver, Tick};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RiverConfig;
use crate::script::{strip_excluded, Script};

/// Batching and retry settings of the Indexer.
#[derive(Debug, Clone)]
pub struct IndexerOpts {
    pub index: String,
    pub doc_type: Option<String>,
    pub bulk_size: usize,
    pub bulk_timeout: Duration,
    pub exclude_fields: Vec<String>,
    /// Retry backoff bounds, shared with the Slurper's polling policy.
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl IndexerOpts {
    pub fn from_config(config: &RiverConfig) -> Self {
        Self {
            index: config.target.index.clone(),
            doc_type: config.target.doc_type.clone(),
            bulk_size: config.target.bulk_size,
            bulk_timeout: config.target.bulk_timeout,
            exclude_fields: config.source.exclude_fields.clone(),
            min_wait: config.source.min_wait,
            max_wait: config.source.max_wait,
        }
    }
}

/// Counters reported when the Indexer exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerStats {
    /// Flushes acknowledged by the target.
    pub batches: u64,
    pub indexed: u64,
    pub deleted: u64,
    /// Dropped by the script or failed in it.
    pub skipped: u64,
    /// Permanently rejected by the target.
    pub rejected: u64,
    /// Bulk or checkpoint attempts that had to be repeated.
    pub retries: u64,
}

/// Events popped since the last flush.
#[derive(Debug, Default)]
struct Batch {
    operations: Vec<BulkOperation>,
    /// Highest tick per collection, skipped events included.
    ticks: BTreeMap<String, Tick>,
    events: usize,
    started: Option<Instant>,
}

impl Batch {
    fn record(&mut self, event: &ChangeEvent) {
        if self.events == 0 {
            self.started = Some(Instant::now());
        }
        self.events += 1;
        match self.ticks.get_mut(&event.collection) {
            Some(tick) if *tick >= event.tick => {}
            Some(tick) => *tick = event.tick.clone(),
            None => {
                self.ticks
                    .insert(event.collection.clone(), event.tick.clone());
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.events == 0
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flushed {
    Applied,
    /// Shutdown arrived while retrying; nothing after this batch may be
    /// checkpointed.
    Abandoned,
}

pub struct Indexer<K: IndexSink, C: CheckpointStore> {
    sink: K,
    checkpoints: C,
    queue: QueueReceiver,
    script: Option<Arc<dyn Script>>,
    opts: IndexerOpts,
    backoff: Backoff,
    stats: IndexerStats,
}

impl<K: IndexSink, C: CheckpointStore> Indexer<K, C> {
    pub fn new(
        sink: K,
        checkpoints: C,
        queue: QueueReceiver,
        script: Option<Arc<dyn Script>>,
        mut opts: IndexerOpts,
    ) -> Self {
        opts.bulk_size = opts.bulk_size.max(1);
        let backoff = Backoff::new(opts.min_wait, opts.max_wait);
        Self {
            sink,
            checkpoints,
            queue,
            script,
            opts,
            backoff,
            stats: IndexerStats::default(),
        }
    }

    /// Run until `cancel` fires (or the Slurper is gone) and the queue is
    /// drained.
    pub async fn run(mut self, cancel: CancellationToken) -> IndexerStats {
        info!(
            "Indexer writing to index '{}' in batches of up to {} (queue capacity {})",
            self.opts.index,
            self.opts.bulk_size,
            self.queue.capacity()
        );

        let mut batch = Batch::default();
        let completed = loop {
            let wait = batch
                .started
                .map(|started| self.opts.bulk_timeout.saturating_sub(started.elapsed()));
            if wait == Some(Duration::ZERO) {
                if self.flush(&mut batch, &cancel).await == Flushed::Abandoned {
                    break false;
                }
                continue;
            }

            match self.queue.pop(wait, &cancel).await {
                Pop::Event(event) => {
                    self.add(&mut batch, event);
                    if batch.events >= self.opts.bulk_size
                        && self.flush(&mut batch, &cancel).await == Flushed::Abandoned
                    {
                        break false;
                    }
                }
                Pop::TimedOut => {
                    if self.flush(&mut batch, &cancel).await == Flushed::Abandoned {
                        break false;
                    }
                }
                Pop::Cancelled | Pop::Closed => break true,
            }
        };

        if completed {
            self.drain(&mut batch, &cancel).await;
        }

        info!("Indexer stopped: {:?}", self.stats);
        self.stats
    }

    /// Flush whatever is still buffered once shutdown was requested.
    async fn drain(&mut self, batch: &mut Batch, cancel: &CancellationToken) {
        let buffered = self.queue.buffered();
        if buffered > 0 || !batch.is_empty() {
            debug!(
                "Draining {} pending and {buffered} queued events",
                batch.events
            );
        }
        while let Some(event) = self.queue.try_pop() {
            self.add(batch, event);
            if batch.events >= self.opts.bulk_size
                && self.flush(batch, cancel).await == Flushed::Abandoned
            {
                return;
            }
        }
        self.flush(batch, cancel).await;
    }

    /// Turn one event into a bulk operation of `batch`.
    fn add(&mut self, batch: &mut Batch, mut event: ChangeEvent) {
        batch.record(&event);

        let operation = match event.operation {
            ChangeOp::Delete => {
                BulkOperation::delete(&self.opts.index, self.opts.doc_type.clone(), &event.key)
            }
            ChangeOp::Insert | ChangeOp::Update => {
                let document = event.document.take().unwrap_or_default();
                let document = match &self.script {
                    None => document,
                    Some(script) => match script.transform(&event, document) {
                        Ok(Some(document)) => document,
                        Ok(None) => {
                            debug!(
                                "Script dropped {} of '{}' at tick {}",
                                event.operation, event.key, event.tick
                            );
                            self.stats.skipped += 1;
                            return;
                        }
                        Err(e) => {
                            warn!(
                                "Skipping {} of '{}' at tick {}: script failed: {e:#}",
                                event.operation, event.key, event.tick
                            );
                            self.stats.skipped += 1;
                            return;
                        }
                    },
                };
                let mut document = document;
                strip_excluded(&mut document, &self.opts.exclude_fields);
                BulkOperation::index(
                    &self.opts.index,
                    self.opts.doc_type.clone(),
                    &event.key,
                    document,
                )
            }
        };
        batch.operations.push(operation);
    }

    /// Submit `batch` until the target acknowledges it, then advance the
    /// checkpoints. Leaves `batch` empty.
    async fn flush(&mut self, batch: &mut Batch, cancel: &CancellationToken) -> Flushed {
        let batch = std::mem::take(batch);
        if batch.is_empty() {
            return Flushed::Applied;
        }

        let events = batch.events;
        let mut operations = batch.operations;
        let mut attempt = 1u32;

        while !operations.is_empty() {
            match self.sink.bulk(&operations).await {
                Ok(response) if !response.has_retryable() => {
                    for (op, outcome) in operations.iter().zip(&response.items) {
                        self.count(op, outcome);
                    }
                    break;
                }
                Ok(response) => {
                    let total = operations.len();
                    let mut retained = Vec::with_capacity(total);
                    for (op, outcome) in operations.into_iter().zip(response.items) {
                        match outcome {
                            ItemOutcome::Rejected { .. } => self.count(&op, &outcome),
                            _ => retained.push(op),
                        }
                    }
                    // Whole batch again, in order, so a retried item never
                    // lands after a later operation on the same key.
                    warn!(
                        "Bulk attempt {attempt}: target throttled items of a {total}-item batch, retrying {} in {:?}",
                        retained.len(),
                        self.backoff.current()
                    );
                    operations = retained;
                }
                Err(e) => {
                    warn!(
                        "Bulk attempt {attempt} of {} operations failed: {e}; retrying in {:?}",
                        operations.len(),
                        self.backoff.current()
                    );
                }
            }

            self.stats.retries += 1;
            attempt += 1;
            if !self.backoff.sleep(cancel).await {
                warn!(
                    "Shutdown while retrying; abandoning a batch of {events} events without advancing the checkpoint"
                );
                return Flushed::Abandoned;
            }
        }
        self.backoff.reset();

        for (collection, tick) in batch.ticks {
            let checkpoint = TickCheckpoint::new(collection, tick);
            while let Err(e) = self.checkpoints.store_checkpoint(&checkpoint).await {
                self.stats.retries += 1;
                warn!(
                    "Failed to store checkpoint {}: {e:#}; retrying in {:?}",
                    checkpoint.to_cli_string(),
                    self.backoff.current()
                );
                if !self.backoff.sleep(cancel).await {
                    warn!(
                        "Shutdown while storing checkpoint {}; its events will be replayed",
                        checkpoint.to_cli_string()
                    );
                    return Flushed::Abandoned;
                }
            }
            debug!("Checkpoint advanced to {}", checkpoint.to_cli_string());
        }
        self.backoff.reset();

        self.stats.batches += 1;
        debug!("Flushed a batch of {events} events after {attempt} attempt(s)");
        Flushed::Applied
    }

    fn count(&mut self, op: &BulkOperation, outcome: &ItemOutcome) {
        match (outcome, op.action) {
            (ItemOutcome::Applied, BulkAction::Index) => self.stats.indexed += 1,
            (ItemOutcome::Applied, BulkAction::Delete) => self.stats.deleted += 1,
            (ItemOutcome::Rejected { status, reason }, _) => {
                warn!(
                    "Target rejected {} of '{}' with status {status}: {reason}",
                    op.action.as_str(),
                    op.id
                );
                self.stats.rejected += 1;
            }
            (ItemOutcome::Retryable { .. }, _) => {}
        }
    }
}

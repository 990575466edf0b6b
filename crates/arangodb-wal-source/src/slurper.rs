//! The Slurper: the producer half of the river.
//!
//! Polls the WAL from the last seen tick, turns markers of the followed
//! collection into change events and pushes them onto the hand-off queue.
//! Empty polls and transient failures back off; a purged start tick falls
//! back to a full collection scan.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use sync_core::{Backoff, ChangeEvent, PushError, QueueSender, Tick};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{CollectionInfo, Decoded, ScanPage, SourceError, TailBatch, WalSource};

/// Tuning of the Slurper.
#[derive(Debug, Clone)]
pub struct SlurperOpts {
    /// First wait after an empty poll.
    pub min_wait: Duration,
    /// Cap of the doubling wait.
    pub max_wait: Duration,
    /// Documents per page of a full collection scan.
    pub scan_batch_size: usize,
}

impl Default for SlurperOpts {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(10),
            scan_batch_size: 1000,
        }
    }
}

/// What to do after one poll.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Poll again right away.
    Again,
    /// Back off before the next poll.
    Wait,
    /// Shutdown observed.
    Stop,
}

pub struct Slurper<S: WalSource> {
    source: S,
    queue: QueueSender,
    collection: CollectionInfo,
    last_tick: Tick,
    backoff: Backoff,
    scan_batch_size: usize,
    emitted: u64,
}

async fn until_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

impl<S: WalSource> Slurper<S> {
    /// Create a Slurper tailing after `start`. Pass [`Tick::origin`] to read
    /// the log from its beginning.
    pub fn new(
        source: S,
        queue: QueueSender,
        collection: CollectionInfo,
        start: Tick,
        opts: SlurperOpts,
    ) -> Self {
        Self {
            source,
            queue,
            collection,
            last_tick: start,
            backoff: Backoff::new(opts.min_wait, opts.max_wait),
            scan_batch_size: opts.scan_batch_size.max(1),
            emitted: 0,
        }
    }

    /// Tick the next poll starts after.
    pub fn last_tick(&self) -> &Tick {
        &self.last_tick
    }

    /// Run until `cancel` fires or a fatal source error occurs.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SourceError> {
        info!(
            "Slurper starting on collection '{}' after tick {}",
            self.collection.name, self.last_tick
        );

        let result = self.poll_loop(&cancel).await;
        match &result {
            Ok(()) => info!(
                "Slurper stopped after {} events, last tick {}",
                self.emitted, self.last_tick
            ),
            Err(e) => error!("Slurper failed on collection '{}': {e}", self.collection.name),
        }
        result
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) -> Result<(), SourceError> {
        loop {
            let Some(polled) = until_cancelled(cancel, self.source.tail(&self.last_tick)).await
            else {
                return Ok(());
            };

            let step = match polled {
                Ok(batch) if !batch.from_present => self.recover_from_gap(cancel).await,
                Ok(batch) => self.apply(batch, cancel).await,
                Err(e) => Err(e),
            };

            let step = match step {
                Ok(step) => step,
                // Errors caused by shutdown closing the source.
                Err(_) if cancel.is_cancelled() => Step::Stop,
                Err(e) if e.is_transient() => {
                    warn!("{e}; retrying in {:?}", self.backoff.current());
                    Step::Wait
                }
                Err(e) => return Err(e),
            };

            match step {
                Step::Again => {}
                Step::Wait => {
                    if !self.backoff.sleep(cancel).await {
                        return Ok(());
                    }
                }
                Step::Stop => return Ok(()),
            }
        }
    }

    /// Push the events of one poll and advance the tail position.
    async fn apply(
        &mut self,
        batch: TailBatch,
        cancel: &CancellationToken,
    ) -> Result<Step, SourceError> {
        let started_at = self.last_tick.clone();
        let mut fresh = 0usize;
        let mut events = 0usize;

        for entry in batch.entries {
            // `from` is inclusive on some servers.
            if entry.tick <= self.last_tick {
                continue;
            }
            fresh += 1;
            let tick = entry.tick.clone();
            match entry.decode(&self.collection) {
                Decoded::Change(event) => {
                    if !self.emit(event, cancel).await {
                        return Ok(Step::Stop);
                    }
                    events += 1;
                }
                Decoded::CollectionDropped => warn!(
                    "Collection '{}' was dropped at tick {tick}; indexed documents are kept",
                    self.collection.name
                ),
                Decoded::CollectionTruncated => warn!(
                    "Collection '{}' was truncated at tick {tick}; indexed documents are kept",
                    self.collection.name
                ),
                Decoded::Skip => {}
            }
            self.last_tick = tick;
        }

        if let Some(last_included) = batch.last_included {
            if last_included > self.last_tick {
                self.last_tick = last_included;
            }
        }

        // Entries at or before the start tick are not progress.
        if self.last_tick > started_at {
            debug!(
                "Polled {fresh} new WAL entries, emitted {events} events, now at tick {}",
                self.last_tick
            );
            self.backoff.reset();
            Ok(Step::Again)
        } else if batch.check_more {
            Ok(Step::Again)
        } else {
            Ok(Step::Wait)
        }
    }

    /// The start tick is gone from the WAL: scan the collection, then tail
    /// from the tick captured before the scan.
    async fn recover_from_gap(&mut self, cancel: &CancellationToken) -> Result<Step, SourceError> {
        if self.last_tick.is_origin() {
            info!(
                "WAL no longer holds its beginning; scanning collection '{}'",
                self.collection.name
            );
        } else {
            warn!(
                "Tick {} was purged from the WAL and its history is lost; rescanning collection '{}'",
                self.last_tick, self.collection.name
            );
        }

        let Some(resume_at) = until_cancelled(cancel, self.source.current_tick()).await else {
            return Ok(Step::Stop);
        };
        let resume_at = resume_at?;

        let origin = self.last_tick.clone();
        let Some(scanned) = self.scan(&origin, cancel).await? else {
            return Ok(Step::Stop);
        };

        info!(
            "Scanned {scanned} documents of '{}', tailing from tick {resume_at}",
            self.collection.name
        );
        if resume_at > self.last_tick {
            self.last_tick = resume_at;
        }
        self.backoff.reset();
        Ok(Step::Again)
    }

    /// Emit every document of the collection as an insert at `tick`.
    ///
    /// Returns `None` when shutdown interrupted the scan.
    async fn scan(
        &mut self,
        tick: &Tick,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, SourceError> {
        let name = self.collection.name.clone();
        let Some(first) =
            until_cancelled(cancel, self.source.open_scan(&name, self.scan_batch_size)).await
        else {
            return Ok(None);
        };
        let mut page: ScanPage = first?;
        let mut scanned = 0u64;

        loop {
            for document in std::mem::take(&mut page.documents) {
                let Some(key) = document.get("_key").and_then(Value::as_str).map(str::to_string)
                else {
                    warn!("Skipping document of '{name}' without _key");
                    continue;
                };
                let event = ChangeEvent::insert(tick.clone(), name.clone(), key, document);
                if !self.emit(event, cancel).await {
                    self.release(page.cursor.take()).await;
                    return Ok(None);
                }
                scanned += 1;
            }

            let Some(cursor) = page.cursor.take() else {
                return Ok(Some(scanned));
            };
            page = match until_cancelled(cancel, self.source.next_scan_page(&cursor)).await {
                Some(Ok(next)) => next,
                Some(Err(e)) => {
                    self.release(Some(cursor)).await;
                    return Err(e);
                }
                None => {
                    self.release(Some(cursor)).await;
                    return Ok(None);
                }
            };
        }
    }

    async fn release(&self, cursor: Option<String>) {
        if let Some(cursor) = cursor {
            if let Err(e) = self.source.close_scan(&cursor).await {
                warn!("Failed to close scan cursor {cursor}: {e}");
            }
        }
    }

    /// Push one event; `false` once the pipeline is shutting down.
    async fn emit(&mut self, event: ChangeEvent, cancel: &CancellationToken) -> bool {
        match self.queue.push(event, cancel).await {
            Ok(()) => {
                self.emitted += 1;
                true
            }
            Err(PushError::Cancelled) => false,
            Err(PushError::Closed) => {
                info!("Indexer is gone, stopping the Slurper");
                false
            }
        }
    }
}

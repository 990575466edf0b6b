//! Pipeline controller.
//!
//! A [`River`] wires one Slurper and one Indexer together through the
//! hand-off queue and owns their lifecycle: `start` runs the startup checks
//! and spawns both units, `close` stops them and waits for them to finish.

use std::sync::Arc;
use std::time::Duration;

use arangodb_wal_source::{Slurper, SourceError, WalSource};
use checkpoint::{CheckpointStore, TickCheckpoint};
use elasticsearch_sink::{IndexSink, SinkError};
use sync_core::{handoff, Tick};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RiverConfig};
use crate::indexer::{Indexer, IndexerOpts, IndexerStats};
use crate::script::Script;

/// Why a river could not start or stopped on its own.
#[derive(Error, Debug)]
pub enum RiverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Target index unavailable: {0}")]
    Target(#[from] SinkError),

    #[error("Source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to read checkpoint: {0:#}")]
    Checkpoint(anyhow::Error),

    #[error("River '{0}' was already started")]
    AlreadyStarted(String),
}

enum State {
    Idle,
    Running {
        slurper: JoinHandle<Result<(), SourceError>>,
        indexer: JoinHandle<IndexerStats>,
    },
    Closed,
}

pub struct River<W, K, C>
where
    W: WalSource + ?Sized + 'static,
    K: IndexSink + ?Sized + 'static,
    C: CheckpointStore + ?Sized + 'static,
{
    config: RiverConfig,
    source: Arc<W>,
    sink: Arc<K>,
    checkpoints: Arc<C>,
    script: Option<Arc<dyn Script>>,
    start_tick: Option<Tick>,
    cancel: CancellationToken,
    state: State,
}

impl<W, K, C> River<W, K, C>
where
    W: WalSource + ?Sized + 'static,
    K: IndexSink + ?Sized + 'static,
    C: CheckpointStore + ?Sized + 'static,
{
    pub fn new(config: RiverConfig, source: Arc<W>, sink: Arc<K>, checkpoints: Arc<C>) -> Self {
        Self {
            config,
            source,
            sink,
            checkpoints,
            script: None,
            start_tick: None,
            cancel: CancellationToken::new(),
            state: State::Idle,
        }
    }

    /// Transform documents through `script` before indexing.
    pub fn with_script(mut self, script: Arc<dyn Script>) -> Self {
        self.script = Some(script);
        self
    }

    /// Start tailing after `tick`, ignoring the stored checkpoint.
    pub fn with_start_tick(mut self, tick: Tick) -> Self {
        self.start_tick = Some(tick);
        self
    }

    pub fn config(&self) -> &RiverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. }) && !self.cancel.is_cancelled()
    }

    /// Resolves once the river stops, on `close` or on a fatal error.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Run the startup checks and spawn the Slurper and the Indexer.
    ///
    /// Nothing is spawned when a check fails.
    pub async fn start(&mut self) -> Result<(), RiverError> {
        if !matches!(self.state, State::Idle) {
            return Err(RiverError::AlreadyStarted(self.config.name.clone()));
        }
        self.config.validate()?;

        let name = self.config.name.clone();
        let index = self.config.target.index.clone();
        let collection_name = self.config.source.collection.clone();
        info!(
            "Starting river '{name}': {}/{} -> index '{index}'",
            self.config.source.database, collection_name
        );

        self.sink.ensure_index(&index).await?;
        let collection = self.source.check_collection(&collection_name).await?;

        let (start, from_beginning) = self.resolve_start(&collection_name).await?;

        if self.config.source.drop_target {
            if from_beginning {
                info!("Recreating index '{index}' before replaying from the beginning");
                self.sink.delete_index(&index).await?;
                self.sink.ensure_index(&index).await?;
            } else {
                info!("Resuming after tick {start}; keeping index '{index}'");
            }
        }

        let capacity = self.config.queue_capacity();
        let (tx, rx) = handoff(capacity);
        debug!("Hand-off queue capacity: {capacity}");

        let slurper = Slurper::new(
            self.source.clone(),
            tx,
            collection,
            start,
            self.config.slurper_opts(),
        );
        let indexer = Indexer::new(
            self.sink.clone(),
            self.checkpoints.clone(),
            rx,
            self.script.clone(),
            IndexerOpts::from_config(&self.config),
        );

        let token = self.cancel.clone();
        let slurper = tokio::spawn(async move {
            let result = slurper.run(token.clone()).await;
            // Without a producer the pipeline cannot make progress.
            token.cancel();
            result
        });

        let token = self.cancel.clone();
        let indexer = tokio::spawn(async move {
            let stats = indexer.run(token.clone()).await;
            token.cancel();
            stats
        });

        self.state = State::Running { slurper, indexer };
        info!("River '{name}' started");
        Ok(())
    }

    /// Decide where the Slurper starts and whether that is the beginning
    /// of the log.
    async fn resolve_start(&self, collection: &str) -> Result<(Tick, bool), RiverError> {
        if let Some(tick) = &self.start_tick {
            info!("Starting '{collection}' after forced tick {tick}");
            return Ok((tick.clone(), tick.is_origin()));
        }
        if self.config.source.full_sync {
            info!("Full sync requested; ignoring the checkpoint of '{collection}'");
            return Ok((Tick::origin(), true));
        }

        let stored: Option<TickCheckpoint> = self
            .checkpoints
            .read_checkpoint(collection)
            .await
            .map_err(RiverError::Checkpoint)?;
        match stored {
            Some(cp) => {
                info!(
                    "Found checkpoint for '{collection}': tick {} written at {}",
                    cp.last_tick, cp.updated_at
                );
                let from_beginning = cp.last_tick.is_origin();
                Ok((cp.last_tick, from_beginning))
            }
            None => {
                info!("No checkpoint for '{collection}'; reading the WAL from its beginning");
                Ok((Tick::origin(), true))
            }
        }
    }

    /// Stop both units and wait for them. A no-op before `start` and after
    /// the first `close`.
    ///
    /// Returns the Slurper's error when the river had stopped on its own.
    pub async fn close(&mut self) -> Result<(), RiverError> {
        let (slurper, indexer) = match std::mem::replace(&mut self.state, State::Closed) {
            State::Running { slurper, indexer } => (slurper, indexer),
            State::Idle => {
                self.state = State::Idle;
                debug!("River '{}' closed before start", self.config.name);
                return Ok(());
            }
            State::Closed => return Ok(()),
        };

        info!("Stopping river '{}'", self.config.name);
        self.cancel.cancel();
        self.source.close().await;

        let timeout = self.config.join_timeout;
        let (slurper, indexer) = tokio::join!(
            join_bounded("Slurper", slurper, timeout),
            join_bounded("Indexer", indexer, timeout),
        );

        if let Some(stats) = indexer {
            info!(
                "River '{}' stopped: {} batches, {} indexed, {} deleted, {} skipped, {} rejected",
                self.config.name,
                stats.batches,
                stats.indexed,
                stats.deleted,
                stats.skipped,
                stats.rejected
            );
        }

        match slurper {
            Some(Err(e)) => Err(RiverError::Source(e)),
            _ => Ok(()),
        }
    }
}

impl<W, K, C> Drop for River<W, K, C>
where
    W: WalSource + ?Sized + 'static,
    K: IndexSink + ?Sized + 'static,
    C: CheckpointStore + ?Sized + 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wait up to `timeout` for a unit, then abort it.
async fn join_bounded<T>(name: &str, mut handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("{name} task failed: {e}");
            None
        }
        Err(_) => {
            warn!("{name} did not stop within {timeout:?}; aborting it");
            handle.abort();
            let _ = handle.await;
            None
        }
    }
}

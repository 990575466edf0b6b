//! Hand-off queue between the Slurper and the Indexer.
//!
//! Both capacity modes are the same `tokio::sync::mpsc` channel: a bounded
//! queue reserves `throttle_size` slots, an unbounded one reserves the
//! largest capacity the channel supports, so a push never waits in practice
//! and backpressure behaves identically in both modes.
//!
//! Every blocking call takes a [`CancellationToken`] so shutdown interrupts
//! a producer parked on a full queue.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::ChangeEvent;

/// Capacity of the hand-off queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// Push blocks once this many events are waiting.
    Bounded(usize),
    /// Push never blocks.
    Unbounded,
}

impl QueueCapacity {
    /// Sentinel `throttle_size` meaning "unbounded".
    pub const UNBOUNDED_THROTTLE: i64 = -1;

    /// Interpret a `throttle_size` setting. Returns `None` for values that
    /// are neither positive nor the unbounded sentinel.
    pub fn from_throttle_size(throttle_size: i64) -> Option<Self> {
        match throttle_size {
            Self::UNBOUNDED_THROTTLE => Some(Self::Unbounded),
            n if n > 0 => usize::try_from(n).ok().map(Self::Bounded),
            _ => None,
        }
    }

    fn slots(&self) -> usize {
        match self {
            QueueCapacity::Bounded(n) => (*n).clamp(1, Semaphore::MAX_PERMITS),
            QueueCapacity::Unbounded => Semaphore::MAX_PERMITS,
        }
    }
}

impl std::fmt::Display for QueueCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueCapacity::Bounded(n) => write!(f, "{n}"),
            QueueCapacity::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Why a push did not enqueue its event.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push cancelled by shutdown")]
    Cancelled,
    #[error("hand-off queue closed by the consumer")]
    Closed,
}

/// Outcome of a [`QueueReceiver::pop`].
#[derive(Debug)]
pub enum Pop {
    Event(ChangeEvent),
    /// The wait limit elapsed with the queue still empty.
    TimedOut,
    /// Shutdown was requested while waiting.
    Cancelled,
    /// The producer is gone and nothing is buffered.
    Closed,
}

/// Create a hand-off queue with the given capacity.
pub fn handoff(capacity: QueueCapacity) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.slots());
    (
        QueueSender { tx, capacity },
        QueueReceiver { rx, capacity },
    )
}

/// Producer half, owned by the Slurper.
#[derive(Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<ChangeEvent>,
    capacity: QueueCapacity,
}

impl QueueSender {
    /// Enqueue an event, waiting for a free slot when the queue is full.
    pub async fn push(
        &self,
        event: ChangeEvent,
        cancel: &CancellationToken,
    ) -> Result<(), PushError> {
        if cancel.is_cancelled() {
            return Err(PushError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PushError::Cancelled),
            permit = self.tx.reserve() => permit.map_err(|_| PushError::Closed)?,
        };
        permit.send(event);
        Ok(())
    }

    /// Enqueue without waiting; gives the event back when the queue is full
    /// or closed.
    pub fn try_push(&self, event: ChangeEvent) -> Result<(), ChangeEvent> {
        self.tx.try_send(event).map_err(|e| e.into_inner())
    }

    /// Number of events pushed but not yet popped.
    pub fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> QueueCapacity {
        self.capacity
    }
}

/// Consumer half, owned by the Indexer.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<ChangeEvent>,
    capacity: QueueCapacity,
}

impl QueueReceiver {
    /// Wait for the next event, at most `wait` when given.
    pub async fn pop(&mut self, wait: Option<Duration>, cancel: &CancellationToken) -> Pop {
        let recv = async {
            match wait {
                Some(limit) => tokio::time::timeout(limit, self.rx.recv()).await.ok(),
                None => Some(self.rx.recv().await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Pop::Cancelled,
            received = recv => match received {
                Some(Some(event)) => Pop::Event(event),
                Some(None) => Pop::Closed,
                None => Pop::TimedOut,
            },
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_pop(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> QueueCapacity {
        self.capacity
    }
}

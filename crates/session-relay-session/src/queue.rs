//! Bounded single-consumer work queue.
//!
//! Entries are handled one at a time, in order, by a consumer task that is
//! started on demand and exits when the queue drains. When the queue is at
//! capacity new entries are rejected; queued work is never evicted.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use session_relay_core::QueueStats;
use thiserror::Error;

/// Error returned by a queued handler.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Queue admission error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full ({capacity} entries), dropping {label}")]
    Full { capacity: usize, label: String },
}

/// A unit of work: its payload is captured by the handler future.
pub struct QueueEntry {
    label: String,
    job: BoxFuture<'static, Result<(), JobError>>,
}

impl QueueEntry {
    #[must_use]
    pub fn new(label: impl Into<String>, job: BoxFuture<'static, Result<(), JobError>>) -> Self {
        Self {
            label: label.into(),
            job,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

struct Pending {
    entries: VecDeque<QueueEntry>,
    in_flight: bool,
    running: bool,
}

impl Pending {
    fn depth(&self) -> usize {
        self.entries.len() + usize::from(self.in_flight)
    }
}

struct Inner {
    pending: Mutex<Pending>,
    capacity: usize,
    pacing: Duration,
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded FIFO drained by at most one consumer task.
///
/// Capacity counts the entry currently being handled, so the queue never
/// holds more than `capacity` units of outstanding work.
#[derive(Clone)]
pub struct BoundedQueue {
    inner: Arc<Inner>,
}

impl BoundedQueue {
    /// Create a queue holding at most `capacity` entries, pausing `pacing`
    /// between two handled entries.
    #[must_use]
    pub fn new(capacity: usize, pacing: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Pending {
                    entries: VecDeque::with_capacity(capacity.min(64)),
                    in_flight: false,
                    running: false,
                }),
                capacity,
                pacing,
                processed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Admit an entry, starting the consumer if it is idle.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`QueueError::Full`] if the queue is at capacity; the entry is dropped.
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let start_consumer = {
            let mut pending = self.inner.lock();
            if pending.depth() >= self.inner.capacity {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                let err = QueueError::Full {
                    capacity: self.inner.capacity,
                    label: entry.label,
                };
                tracing::warn!("{err}");
                return Err(err);
            }
            pending.entries.push_back(entry);
            !std::mem::replace(&mut pending.running, true)
        };

        if start_consumer {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }
        Ok(())
    }

    /// Entries waiting or being handled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().depth()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Whether a consumer task is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.inner.capacity,
            processed: self.inner.processed.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let entry = {
            let mut pending = inner.lock();
            match pending.entries.pop_front() {
                Some(entry) => {
                    pending.in_flight = true;
                    entry
                }
                None => {
                    pending.running = false;
                    return;
                }
            }
        };

        let QueueEntry { label, job } = entry;
        // Run on its own task so a panicking handler is contained.
        match tokio::spawn(job).await {
            Ok(Ok(())) => {
                inner.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(entry = %label, "Queue handler failed: {e}");
            }
            Err(e) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(entry = %label, "Queue handler panicked: {e}");
            }
        }

        inner.lock().in_flight = false;
        tokio::time::sleep(inner.pacing).await;
    }
}

//! Bounded job queue feeding a fixed set of worker tasks.

use crate::core::TransferInfo;
use crate::manager::orchestrator::ScanOrchestrator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;

/// Why a transfer was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// All queue slots are taken.
    #[error("Scan queue is full")]
    Full,
    /// The pool is draining or stopped.
    #[error("Scan service is shutting down")]
    Closed,
}

/// Counters shared between the pool handle and its workers.
#[derive(Debug, Default)]
struct Counters {
    pending: AtomicU64,
    active: AtomicU64,
    finished: AtomicU64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs waiting for a worker.
    pub pending: u64,
    /// Jobs currently running.
    pub active: u64,
    /// Jobs that ran to completion.
    pub finished: u64,
}

/// Runs accepted transfers on `workers` tasks behind a queue of `capacity`.
///
/// Admission never waits: [`WorkerPool::submit`] fails fast when the queue
/// is full. [`WorkerPool::shutdown`] stops admission and waits until every
/// queued job has run.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<TransferInfo>>>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
    worker_count: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawns the workers. Must be called inside a Tokio runtime.
    pub fn start(orchestrator: Arc<ScanOrchestrator>, workers: usize, capacity: usize) -> Self {
        let worker_count = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let mut set = JoinSet::new();
        for worker_id in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let orchestrator = Arc::clone(&orchestrator);
            let counters = Arc::clone(&counters);
            set.spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(info) = job else {
                        break;
                    };
                    counters.pending.fetch_sub(1, Ordering::SeqCst);
                    counters.active.fetch_add(1, Ordering::SeqCst);
                    let state = orchestrator.run(info).await;
                    counters.active.fetch_sub(1, Ordering::SeqCst);
                    counters.finished.fetch_add(1, Ordering::SeqCst);
                    tracing::trace!(worker_id, %state, "Job finished");
                }
                tracing::debug!(worker_id, "Worker stopped");
            });
        }

        tracing::info!(workers = worker_count, capacity, "Worker pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: tokio::sync::Mutex::new(set),
            counters,
            worker_count,
            capacity,
        }
    }

    /// Queues `info` without waiting.
    pub fn submit(&self, info: TransferInfo) -> Result<(), SubmitError> {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::Closed);
        };

        // Count before sending so a fast worker never sees pending at zero.
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(info) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                match e {
                    TrySendError::Full(_) => Err(SubmitError::Full),
                    TrySendError::Closed(_) => Err(SubmitError::Closed),
                }
            }
        }
    }

    /// Stops admission and waits for every queued job to finish.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        tracing::info!(pending = self.stats().pending, "Draining worker pool");
        let mut workers = self.workers.lock().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::info!(finished = self.stats().finished, "Worker pool drained");
    }

    /// Returns `true` once shutdown began.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Returns the current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pending: self.counters.pending.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            finished: self.counters.finished.load(Ordering::SeqCst),
        }
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

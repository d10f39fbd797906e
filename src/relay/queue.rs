//! Unbounded FIFO of pending delivery jobs.
//!
//! Any number of producers push; exactly one worker pops. Jobs from every producer
//! (relay fan-out and broadcasts) share one queue, so delivery order is enqueue order.

use super::message::DeliveryJob;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub total_enqueued: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub avg_wait_time_ms: f64,
}

/// FIFO delivery queue with wake-up on push
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    jobs: Mutex<VecDeque<DeliveryJob>>,
    /// Signals the worker that the queue became non-empty
    ready: Notify,
    total_enqueued: AtomicU64,
    total_delivered: AtomicU64,
    total_failed: AtomicU64,
    total_wait_time_ms: AtomicU64,
}

impl DeliveryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a job. Returns its 1-based position in the queue.
    pub fn push(&self, job: DeliveryJob) -> usize {
        let position = {
            let mut jobs = self.lock();
            jobs.push_back(job);
            jobs.len()
        };
        self.total_enqueued.fetch_add(1, Ordering::SeqCst);
        self.ready.notify_one();
        position
    }

    /// Append jobs in iteration order, atomically with respect to other producers.
    /// Returns the number of jobs added.
    pub fn push_all(&self, batch: impl IntoIterator<Item = DeliveryJob>) -> usize {
        let added = {
            let mut jobs = self.lock();
            let before = jobs.len();
            jobs.extend(batch);
            jobs.len() - before
        };
        if added > 0 {
            self.total_enqueued.fetch_add(added as u64, Ordering::SeqCst);
            self.ready.notify_one();
        }
        added
    }

    /// Pop the head job, if any
    pub fn try_pop(&self) -> Option<DeliveryJob> {
        let job = self.lock().pop_front()?;
        let waited = job.queued_at.elapsed().as_millis() as u64;
        self.total_wait_time_ms.fetch_add(waited, Ordering::SeqCst);
        Some(job)
    }

    /// Wait until a job is available and pop it.
    ///
    /// Cancel-safe: a job is only removed when this future completes.
    pub async fn next(&self) -> DeliveryJob {
        loop {
            if let Some(job) = self.try_pop() {
                return job;
            }
            // notify_one stores a permit when nobody waits, so a push between
            // try_pop and this await is not lost.
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record the outcome of a processed job
    pub fn record_outcome(&self, delivered: bool) {
        if delivered {
            self.total_delivered.fetch_add(1, Ordering::SeqCst);
        } else {
            self.total_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn stats(&self) -> QueueStats {
        let delivered = self.total_delivered.load(Ordering::SeqCst);
        let failed = self.total_failed.load(Ordering::SeqCst);
        let processed = delivered + failed;
        let avg_wait_time_ms = if processed == 0 {
            0.0
        } else {
            self.total_wait_time_ms.load(Ordering::SeqCst) as f64 / processed as f64
        };

        QueueStats {
            pending: self.len(),
            total_enqueued: self.total_enqueued.load(Ordering::SeqCst),
            total_delivered: delivered,
            total_failed: failed,
            avg_wait_time_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeliveryJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// src/core/queue.rs

//! Fixed-concurrency task queue with depth introspection.
//!
//! Admission is FIFO (tokio's semaphore is fair); completion order is not.
//! Producers use [`BoundedQueue::queue_length`] and
//! [`BoundedQueue::wait_until_below`] to apply their own backpressure, and
//! [`BoundedQueue::wait_for_empty`] synchronizes shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::models::QueueState;

pub const DEFAULT_CONCURRENCY: usize = 100;

#[derive(Debug)]
struct QueueInner {
    permits: Semaphore,
    limit: usize,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    poll_interval: Duration,
}

/// Decrements `in_flight` even when the task panics.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheaply clonable handle to a shared queue.
#[derive(Debug, Clone)]
pub struct BoundedQueue {
    inner: Arc<QueueInner>,
}

impl BoundedQueue {
    pub fn new(limit: usize, poll_interval: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(QueueInner {
                permits: Semaphore::new(limit),
                limit,
                queued: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                poll_interval,
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Enqueues `task`. It starts as soon as fewer than `limit` tasks are in flight.
    ///
    /// The handle resolves to `None` when the queue was closed before the task
    /// got a slot; the task is then dropped without running.
    pub fn add<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Ok(_permit) = inner.permits.acquire().await else {
                inner.queued.fetch_sub(1, Ordering::SeqCst);
                debug!("Queue closed, dropping task.");
                return None;
            };
            // Counted as running before it stops counting as queued, so the
            // queue never looks idle in between.
            inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlightGuard(&inner.in_flight);
            inner.queued.fetch_sub(1, Ordering::SeqCst);
            Some(task.await)
        })
    }

    /// Tasks waiting for a slot.
    pub fn queue_length(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently running.
    pub fn pending_length(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueueState {
        QueueState {
            in_flight: self.pending_length(),
            queued: self.queue_length(),
        }
    }

    /// Stops admitting tasks. Anything still waiting for a slot is dropped.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Polls until nothing is queued and nothing is in flight.
    pub async fn wait_for_empty(&self) {
        while !self.state().is_idle() {
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }

    /// Polls until fewer than `n` tasks are waiting for a slot.
    pub async fn wait_until_below(&self, n: usize) {
        while self.queue_length() >= n {
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }
}

impl Default for BoundedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, Duration::from_secs(1))
    }
}

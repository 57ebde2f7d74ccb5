//! # Worker Pool
//!
//! Bounded concurrency for transcription work. Submitted futures are
//! spawned immediately but run only after acquiring one of a fixed number
//! of semaphore permits, so at most `capacity` transcriptions execute at
//! once while the rest queue on the semaphore.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    /// Tasks currently holding a permit.
    active: Arc<AtomicUsize>,
    /// Tasks submitted and not yet finished, including those queued.
    in_flight: Arc<AtomicUsize>,
    accepting: AtomicBool,
}

/// Decrements a counter when dropped, so panicking tasks still release
/// their slot in the accounting.
struct CountGuard(Arc<AtomicUsize>);

impl CountGuard {
    fn increment(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(true),
        }
    }

    /// Queue a unit of work. Returns the join handle for callers that want
    /// the outcome inline; fire-and-forget callers can drop it.
    pub fn submit<F, T>(&self, work: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(anyhow!("worker pool is shutting down"));
        }

        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let in_flight_guard = CountGuard::increment(&self.in_flight);

        let handle = tokio::spawn(async move {
            let _in_flight = in_flight_guard;
            // Closed only at shutdown, after accepting is already false.
            let _permit = semaphore.acquire().await;
            let _active = CountGuard::increment(&active);
            work.await
        });
        Ok(handle)
    }

    /// Number of tasks currently executing (holding a permit).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks submitted and not yet finished, queued ones included.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting work and wait for in-flight tasks to drain, up to
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        info!(
            in_flight = self.in_flight_count(),
            "Worker pool draining before shutdown"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.in_flight_count(),
                    "Shutdown timeout reached with tasks still in flight"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        debug!("Worker pool drained");
    }
}

//! Bounded worker pool with admission throttle and watchdog (C2).
//!
//! Grounded in the fixed-capacity worker/queue pattern of a Hyper-adjacent
//! server loop: a pre-sized pool of workers drains a single FIFO queue,
//! and a semaphore on the accept side decouples accept rate from execution
//! rate without unbounded growth.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// FIFO work queue. Enqueue is O(1) and always succeeds — the admission
/// throttle is the pool's sole backpressure mechanism. Dequeue only ever
/// pops the head; dequeue-by-handle is intentionally unsupported and traps
/// if ever called (a programming error, not a runtime condition a caller
/// can hit through the public API).
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    /// Pops the head of the queue, waiting if empty.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Not supported by this queue's contract — see the type doc comment.
    pub fn pop_by_handle(&self, _handle: usize) -> ! {
        unreachable!("WorkQueue does not support dequeue-by-handle")
    }
}

/// Configuration for [`BoundedWorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub thread_count: usize,
    pub op_thread_timeout: Duration,
    pub op_thread_suicide_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_count: 100,
            op_thread_timeout: Duration::from_secs(60),
            op_thread_suicide_timeout: Duration::from_secs(600),
        }
    }
}

/// Admission throttle plus watchdog wrapper around `tokio::spawn`. The
/// throttle's capacity is `2 * thread_count`: the acceptor acquires one
/// permit before accepting a connection, and the worker releases it once
/// the operation finishes, bounding the number of resident envelopes.
pub struct BoundedWorkerPool {
    admission: Arc<Semaphore>,
    config: PoolConfig,
}

impl BoundedWorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(config.thread_count * 2)),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquires one admission permit. The acceptor awaits this before
    /// calling `accept` again; held until the worker handling that
    /// connection finishes.
    pub async fn acquire_admission(&self) -> OwnedSemaphorePermit {
        self.admission
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore never closed")
    }

    /// Runs `fut` to completion on a fresh task, logging a warning if it
    /// exceeds the soft timeout and aborting the process if it exceeds the
    /// hard (suicide) timeout — the pool's escape hatch for wedged backend
    /// I/O that nothing else in the cancellation model can reach. The soft
    /// timeout only warns; it never cancels `fut`, so the hard timeout is
    /// the one deadline that can actually end the operation.
    pub fn spawn_watched<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let soft = self.config.op_thread_timeout;
        let hard = self.config.op_thread_suicide_timeout;
        tokio::spawn(async move {
            tokio::pin!(fut);
            let hard_deadline = tokio::time::Instant::now() + hard;
            let mut warned = false;
            loop {
                tokio::select! {
                    _ = &mut fut => return,
                    _ = tokio::time::sleep(soft), if !warned => {
                        warned = true;
                        tracing::warn!("operation exceeded soft timeout of {:?}", soft);
                    }
                    _ = tokio::time::sleep_until(hard_deadline) => {
                        tracing::error!(
                            "operation exceeded suicide timeout of {:?}; aborting process",
                            hard
                        );
                        std::process::abort();
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn work_queue_is_fifo() {
        let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop().await, 1);
        assert_eq!(q.pop().await, 2);
        assert_eq!(q.pop().await, 3);
    }

    #[tokio::test]
    async fn admission_throttle_caps_concurrency() {
        let pool = Arc::new(BoundedWorkerPool::new(PoolConfig {
            thread_count: 2,
            ..Default::default()
        }));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = pool.acquire_admission().await;
                let n = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_timeout_warns_but_lets_the_operation_keep_running() {
        let pool = BoundedWorkerPool::new(PoolConfig {
            thread_count: 1,
            op_thread_timeout: Duration::from_millis(10),
            op_thread_suicide_timeout: Duration::from_secs(3600),
        });
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        pool.spawn_watched(async move {
            // Runs well past the soft timeout but nowhere near the hard one.
            tokio::time::sleep(Duration::from_millis(100)).await;
            done_clone.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}

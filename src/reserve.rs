//! Generic async reservation queue (C1).
//!
//! Expresses "at most N concurrent jobs, each uniquely tagged" — the
//! primitive [`crate::ops::multipart`] uses to serialize work against a
//! single upload id, and any other operation can reach for the same way.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;

type ReadyCallback<K> = Box<dyn FnOnce(K) + Send>;

struct Inner<K> {
    queue: VecDeque<(K, ReadyCallback<K>)>,
    in_progress: HashSet<K>,
    queued_keys: HashSet<K>,
    max_allowed: usize,
}

/// FIFO reservation queue with a configurable concurrency cap and at-most-one
/// ticket per key.
pub struct AsyncReserver<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    inner: Mutex<Inner<K>>,
}

impl<K> AsyncReserver<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(max_allowed: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                in_progress: HashSet::new(),
                queued_keys: HashSet::new(),
                max_allowed,
            }),
        }
    }

    /// Requests a reservation for `key`. Precondition: `key` is not already
    /// queued or in-progress — violating it is a programming error and
    /// aborts — reservation bugs must fail fatally, not silently misorder.
    ///
    /// `on_ready` is invoked synchronously, from whichever caller's thread
    /// happens to trigger the drain that admits this key (either this call,
    /// if a slot is free immediately, or a later [`Self::cancel`]/completion
    /// from another key). It is never invoked more than once.
    pub fn request<F>(&self, key: K, on_ready: F)
    where
        F: FnOnce(K) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.in_progress.contains(&key) || inner.queued_keys.contains(&key) {
            unreachable!("AsyncReserver::request precondition violated: key already reserved");
        }
        inner.queued_keys.insert(key.clone());
        inner.queue.push_back((key, Box::new(on_ready)));
        Self::drain(&mut inner);
    }

    /// Releases `key`, whether queued or in-progress, and re-drains.
    /// Call this once the work for a previously-admitted key has finished,
    /// to let the next queued key (if any) become eligible.
    pub fn release(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.in_progress.remove(key);
        Self::drain(&mut inner);
    }

    /// Cancels `key`. If queued, it's removed and its callback is dropped
    /// without being invoked. If in-progress, it's removed (as if
    /// released). Otherwise a no-op. Idempotent.
    pub fn cancel(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.queue.iter().position(|(k, _)| k == key) {
            inner.queue.remove(pos);
            inner.queued_keys.remove(key);
        }
        inner.in_progress.remove(key);
        Self::drain(&mut inner);
    }

    fn drain(inner: &mut Inner<K>) {
        while inner.in_progress.len() < inner.max_allowed {
            let Some((key, callback)) = inner.queue.pop_front() else {
                break;
            };
            inner.queued_keys.remove(&key);
            inner.in_progress.insert(key.clone());
            callback(key);
        }
    }

    /// Current in-progress count, for tests and diagnostics.
    pub fn in_progress_count(&self) -> usize {
        self.inner.lock().in_progress.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn fairness_ready_order_matches_enqueue_order() {
        let reserver = Arc::new(AsyncReserver::new(3));
        let ready: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));

        for k in 1..=10u32 {
            let ready = ready.clone();
            reserver.request(k, move |k| ready.lock().unwrap().push(k));
        }

        assert_eq!(*ready.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(reserver.in_progress_count(), 3);

        reserver.release(&1);
        assert_eq!(*ready.lock().unwrap(), vec![1, 2, 3, 4]);

        reserver.release(&2);
        assert_eq!(*ready.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn cancel_queued_never_fires_callback() {
        let reserver = AsyncReserver::new(1);
        let fired = Arc::new(StdMutex::new(false));

        reserver.request(1u32, |_| {});
        assert_eq!(reserver.in_progress_count(), 1);

        let fired2 = fired.clone();
        reserver.request(2u32, move |_| *fired2.lock().unwrap() = true);
        reserver.cancel(&2);
        reserver.release(&1);

        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn cancel_in_progress_does_not_refire_and_frees_slot() {
        let reserver = AsyncReserver::new(1);
        reserver.request(1u32, |_| {});
        assert_eq!(reserver.in_progress_count(), 1);
        reserver.cancel(&1);
        assert_eq!(reserver.in_progress_count(), 0);
    }

    #[test]
    fn cancel_unknown_key_is_a_no_op() {
        let reserver: AsyncReserver<u32> = AsyncReserver::new(2);
        reserver.cancel(&42);
        assert_eq!(reserver.in_progress_count(), 0);
    }

    #[test]
    #[should_panic(expected = "precondition violated")]
    fn duplicate_request_is_a_programming_error() {
        let reserver = AsyncReserver::new(2);
        reserver.request(1u32, |_| {});
        reserver.request(1u32, |_| {});
    }
}

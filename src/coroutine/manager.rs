//! Group cancellation for in-flight futures and coroutines.

use parking_lot::Mutex;
use std::fmt;

use crate::future::{Cancellable, Future};
use crate::types::FutureId;

/// Tracks futures without owning them, so an owner (a widget, a session) can
/// cancel all of its outstanding work at once.
///
/// Entries are weak: a tracked future lives exactly as long as its other
/// handles do. Dead and already terminal entries are pruned on every
/// [`add`](Self::add). Dropping the manager cancels whatever is still live.
#[derive(Default)]
pub struct CoroutineManager {
    entries: Mutex<Vec<Box<dyn Cancellable>>>,
}

impl CoroutineManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `future`. Coroutines are accepted through deref.
    pub fn add<T>(&self, future: &Future<T>)
    where
        T: Clone + Send + 'static,
    {
        let mut entries = self.entries.lock();
        entries.retain(|entry| !entry.is_ready());
        entries.push(Box::new(future.downgrade()));
    }

    /// Stops tracking the future with `id`; returns true if it was tracked.
    pub fn detach(&self, id: FutureId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.future_id() != id);
        entries.len() != before
    }

    /// Cancels every live tracked future and forgets all entries.
    ///
    /// Returns how many futures this call actually cancelled.
    pub fn cancel(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        let tracked = entries.len();
        let cancelled = entries.iter().filter(|entry| entry.cancel()).count();
        if tracked > 0 {
            tracing::debug!(tracked, cancelled, "coroutine manager cancelled its entries");
        }
        cancelled
    }

    /// Number of tracked futures that are still live and waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|entry| !entry.is_ready());
        entries.len()
    }

    /// True if nothing live is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CoroutineManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CoroutineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineManager")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{Coroutine, Resume, Step, Steps};
    use crate::future::Status;
    use crate::test_utils::test_run_loop;

    #[test]
    fn cancel_reaches_live_entries() {
        let (_run_loop, sched) = test_run_loop();
        let manager = CoroutineManager::new();
        let a: Future<i32> = Future::new(&sched);
        let b: Future<String> = Future::new(&sched);
        manager.add(&a);
        manager.add(&b);
        assert_eq!(manager.len(), 2);

        assert_eq!(manager.cancel(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(manager.is_empty());
    }

    #[test]
    fn dead_and_finished_entries_are_pruned() {
        let (_run_loop, sched) = test_run_loop();
        let manager = CoroutineManager::new();
        let dropped: Future<i32> = Future::new(&sched);
        let finished: Future<i32> = Future::new(&sched);
        manager.add(&dropped);
        manager.add(&finished);
        drop(dropped);
        finished.set_done(1).expect("done");

        let live: Future<i32> = Future::new(&sched);
        manager.add(&live);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.cancel(), 1);
        assert_eq!(finished.status(), Status::Done);
    }

    #[test]
    fn detach_stops_tracking() {
        let (_run_loop, sched) = test_run_loop();
        let manager = CoroutineManager::new();
        let kept: Future<i32> = Future::new(&sched);
        manager.add(&kept);
        assert!(manager.detach(kept.id()));
        assert!(!manager.detach(kept.id()));
        assert_eq!(manager.cancel(), 0);
        assert!(!kept.ready());
    }

    #[test]
    fn drop_cancels_suspended_coroutine() {
        let (run_loop, sched) = test_run_loop();
        let sub: Future<i32> = Future::new(&sched);
        let s = sub.clone();
        let co: Coroutine<i32> = Coroutine::spawn(
            &sched,
            Steps::new()
                .then(move |_| Step::await_on(&s))
                .then(|r: Resume| r.then(|v: i32| Step::Done(v))),
        );
        {
            let manager = CoroutineManager::new();
            manager.add(&co);
        }
        run_loop.run_pending();
        assert_eq!(co.status(), Status::Cancelled);
        assert_eq!(sub.status(), Status::Cancelled);
    }
}

//! Serialized run-loop scheduler.
//!
//! [`RunLoopScheduler`] models a host event loop (a UI thread, a game loop):
//! posted calls are queued and executed only when the owning thread pumps the
//! loop with [`run_pending`](RunLoopScheduler::run_pending) or
//! [`run_until`](RunLoopScheduler::run_until). The thread that constructs the
//! scheduler owns it; a blocking [`Future::wait`](crate::future::Future::wait)
//! from that thread is refused instead of deadlocking.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::runtime::scheduler::{Call, Scheduler, SchedulerHandle};
use crate::runtime::thread_pool::ThreadPool;

/// Longest sleep between predicate checks in [`RunLoopScheduler::run_until`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scheduler whose calls run when the owning thread pumps the loop.
pub struct RunLoopScheduler {
    calls: Mutex<VecDeque<Call>>,
    posted: Condvar,
    owner: ThreadId,
    pool: ThreadPool,
}

impl RunLoopScheduler {
    /// Creates a loop owned by the calling thread.
    #[must_use]
    pub fn new(pool: ThreadPool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(VecDeque::new()),
            posted: Condvar::new(),
            owner: thread::current().id(),
            pool,
        })
    }

    /// Returns a [`SchedulerHandle`] sharing this loop.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> SchedulerHandle {
        SchedulerHandle::from_arc(Arc::clone(self) as Arc<dyn Scheduler>)
    }

    /// Number of calls queued but not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.calls.lock().len()
    }

    /// Runs every queued call, including ones posted while draining.
    ///
    /// Returns the number of calls executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.calls.lock().pop_front();
            match next {
                Some(call) => {
                    call();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::trace!(ran, "run loop drained");
        }
        ran
    }

    /// Pumps the loop until `done` returns true or `timeout` elapses.
    ///
    /// `done` is re-checked after every post and at least every
    /// [`POLL_INTERVAL`], so state changed off the loop is also seen.
    /// Returns the final value of `done`.
    pub fn run_until<P>(&self, mut done: P, timeout: Duration) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut calls = self.calls.lock();
            if calls.is_empty() {
                let _ = self
                    .posted
                    .wait_until(&mut calls, (now + POLL_INTERVAL).min(deadline));
            }
        }
    }
}

impl Scheduler for RunLoopScheduler {
    fn post_call(&self, call: Call) {
        self.calls.lock().push_back(call);
        self.posted.notify_all();
    }

    fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    fn is_current_context(&self) -> bool {
        thread::current().id() == self.owner
    }
}

impl fmt::Debug for RunLoopScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoopScheduler")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .field("pool", &self.pool)
            .finish()
    }
}

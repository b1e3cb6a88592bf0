//! Scheduler contract.
//!
//! A [`Scheduler`] decides where deferred work runs. Every callback bound to a
//! [`Future`] is delivered through [`Scheduler::post_call`], so subscribers
//! always run on the scheduler's serialized execution context and never
//! directly on the worker thread that produced the result. Blocking work goes
//! to the scheduler's [`ThreadPool`] through [`SchedulerHandle::async_call`].
//!
//! Components receive a [`SchedulerHandle`] at construction. Hosts that want a
//! process-wide handle can [`install`] one exactly once at startup and fetch it
//! with [`current`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, ErrorKind, Result};
use crate::future::Future;
use crate::runtime::thread_pool::ThreadPool;

/// A deferred zero-argument action.
pub type Call = Box<dyn FnOnce() + Send + 'static>;

/// Execution strategy for deferred work.
pub trait Scheduler: Send + Sync {
    /// Runs `call` under the scheduler's execution discipline.
    ///
    /// Must eventually execute `call` on the scheduler's serialized context,
    /// regardless of the calling thread.
    fn post_call(&self, call: Call);

    /// The pool used for blocking calls.
    fn pool(&self) -> &ThreadPool;

    /// Returns true if the calling thread is the scheduler's own context.
    ///
    /// Blocking waits are refused on that context since they would starve it.
    fn is_current_context(&self) -> bool {
        false
    }

    /// Stops the pool, joining every worker thread.
    fn shutdown(&self) {
        self.pool().shutdown();
    }
}

/// Shared, cloneable reference to a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<dyn Scheduler>,
}

impl SchedulerHandle {
    /// Wraps a scheduler in a handle.
    pub fn new<S: Scheduler + 'static>(scheduler: S) -> Self {
        Self {
            inner: Arc::new(scheduler),
        }
    }

    /// Wraps an already shared scheduler.
    #[must_use]
    pub fn from_arc(inner: Arc<dyn Scheduler>) -> Self {
        Self { inner }
    }

    /// Schedules `f` on the scheduler's execution context.
    pub fn post_call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post_call(Box::new(f));
    }

    pub(crate) fn post_boxed(&self, call: Call) {
        self.inner.post_call(call);
    }

    /// Runs the blocking call `f` on the pool, returning its future.
    ///
    /// A panic inside `f` resolves the future as failed.
    pub fn async_call<T, F>(&self, f: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.inner.pool().submit(self, f)
    }

    /// Runs the fallible blocking call `f` on the pool.
    ///
    /// `Err` and panics both resolve the future as failed.
    pub fn async_try_call<T, E, F>(&self, f: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        self.inner.pool().try_submit(self, f)
    }

    /// Returns true if the calling thread is the scheduler's own context.
    #[must_use]
    pub fn is_current_context(&self) -> bool {
        self.inner.is_current_context()
    }

    /// The pool owned by this scheduler.
    #[must_use]
    pub fn pool(&self) -> &ThreadPool {
        self.inner.pool()
    }

    /// Stops the pool and joins its workers. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("pool", self.inner.pool())
            .finish()
    }
}

/// Scheduler that runs posted calls inline on the posting thread.
///
/// Suitable for hosts without a dedicated event loop; callbacks for results
/// produced by the pool then run on the worker thread that produced them.
#[derive(Debug)]
pub struct ImmediateScheduler {
    pool: ThreadPool,
}

impl ImmediateScheduler {
    /// Creates the scheduler around `pool`.
    #[must_use]
    pub fn new(pool: ThreadPool) -> Self {
        Self { pool }
    }

    /// Convenience: wraps a new scheduler in a [`SchedulerHandle`].
    #[must_use]
    pub fn handle(pool: ThreadPool) -> SchedulerHandle {
        SchedulerHandle::new(Self::new(pool))
    }
}

impl Scheduler for ImmediateScheduler {
    fn post_call(&self, call: Call) {
        call();
    }

    fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

static INSTALLED: OnceLock<SchedulerHandle> = OnceLock::new();

/// Installs the process-wide scheduler.
///
/// Returns [`ErrorKind::SchedulerAlreadyInstalled`] if one is already set.
pub fn install(handle: SchedulerHandle) -> Result<()> {
    INSTALLED.set(handle).map_err(|_| {
        Error::new(ErrorKind::SchedulerAlreadyInstalled)
            .with_message("a process-wide scheduler is already installed")
    })?;
    tracing::debug!("process-wide scheduler installed");
    Ok(())
}

/// Returns the process-wide scheduler, if one was installed.
#[must_use]
pub fn installed() -> Option<&'static SchedulerHandle> {
    INSTALLED.get()
}

/// Returns the process-wide scheduler.
///
/// # Panics
///
/// Panics if no scheduler was installed; using the runtime before startup
/// finished is a programming error.
#[must_use]
pub fn current() -> SchedulerHandle {
    match INSTALLED.get() {
        Some(handle) => handle.clone(),
        None => panic!("no scheduler installed; call runtime::install at startup"),
    }
}

/// Posts `f` through the process-wide scheduler.
pub fn post_call<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    current().post_call(f);
}

/// Submits `f` to the process-wide scheduler's pool.
pub fn async_call<T, F>(f: F) -> Future<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    current().async_call(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn immediate_scheduler_runs_inline() {
        let handle = ImmediateScheduler::handle(ThreadPool::new(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        handle.post_call(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_current_context());
        handle.shutdown();
    }

    #[test]
    fn async_call_resolves_through_pool() {
        let handle = ImmediateScheduler::handle(ThreadPool::new(2));
        let future = handle.async_call(|| 6 * 7);
        assert_eq!(future.wait().expect("value"), 42);
        handle.shutdown();
        handle.shutdown();
    }

    #[test]
    fn install_is_write_once() {
        let first = ImmediateScheduler::handle(ThreadPool::new(1));
        let second = ImmediateScheduler::handle(ThreadPool::new(1));
        // Only this test touches the process-wide slot.
        install(first).expect("first install");
        let err = install(second).expect_err("second install must fail");
        assert_eq!(err.kind(), ErrorKind::SchedulerAlreadyInstalled);
        assert!(installed().is_some());

        let value = async_call(|| "from global").wait().expect("value");
        assert_eq!(value, "from global");
    }
}

//! Coroutines: futures driven by a suspendable routine.
//!
//! A [`Coroutine`] is a [`Future`] whose outcome is produced by driving a
//! [`Routine`]. Each [`Step::Await`] suspends the coroutine on a sub-future;
//! the sub-future's outcome is posted back through the scheduler and resumes
//! the routine. At most one sub-future is outstanding at a time.
//!
//! Cancelling a coroutine cancels the awaited sub-future too, and a stale
//! resumption from that sub-future is ignored.
//!
//! A panic escaping the routine becomes the coroutine's failure, except for a
//! [`HostExit`](crate::types::HostExit) unwind, which cancels the coroutine
//! and continues unwinding out of the drive call.
//!
//! - [`routine`]: the step types and the [`Routine`] trait
//! - [`queue`]: run coroutines one at a time, in submission order
//! - [`manager`]: cancel a group of coroutines together

pub mod manager;
pub mod queue;
pub mod routine;

pub use manager::CoroutineManager;
pub use queue::CoroutineQueue;
pub use routine::{AnyValue, Awaitable, Interrupt, Resume, Routine, Step, Steps};

use core::fmt;
use parking_lot::Mutex;
use std::ops::Deref;
use std::panic;
use std::sync::Arc;

use crate::error::{Failure, Result};
use crate::future::{Cancellable, Future};
use crate::runtime::scheduler::SchedulerHandle;
use crate::types::{catch_unwind, host_exit, FutureId, PanicPayload};

struct Driver<T> {
    routine: Option<Box<dyn Routine<T>>>,
    awaiting: Option<Box<dyn Awaitable>>,
    started: bool,
    /// Bumped whenever the current await is consumed or abandoned.
    epoch: u64,
}

type SharedDriver<T> = Arc<Mutex<Driver<T>>>;

/// A future produced by driving a [`Routine`].
///
/// Dereferences to its [`Future`], so `bind`, `cancel`, `wait` and the
/// accessors are available directly.
pub struct Coroutine<T> {
    future: Future<T>,
    driver: SharedDriver<T>,
}

impl<T> Clone for Coroutine<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<T: Clone + Send + 'static> Coroutine<T> {
    /// Wraps `routine` in a coroutine that has not started yet.
    pub fn new<R>(scheduler: &SchedulerHandle, routine: R) -> Self
    where
        R: Routine<T>,
    {
        let future = Future::new(scheduler);
        let driver: SharedDriver<T> = Arc::new(Mutex::new(Driver {
            routine: Some(Box::new(routine)),
            awaiting: None,
            started: false,
            epoch: 0,
        }));

        let hook_driver = Arc::clone(&driver);
        let id = future.id();
        future.set_cancel_hook(move || {
            let awaiting = {
                let mut driver = hook_driver.lock();
                driver.epoch += 1;
                driver.awaiting.take()
            };
            if let Some(awaiting) = awaiting {
                tracing::trace!(
                    future_id = %id,
                    awaiting = %awaiting.awaited_id(),
                    "cancelling awaited future"
                );
                awaiting.cancel();
            }
        });

        Self { future, driver }
    }

    /// Creates and starts a coroutine.
    pub fn spawn<R>(scheduler: &SchedulerHandle, routine: R) -> Self
    where
        R: Routine<T>,
    {
        let coroutine = Self::new(scheduler, routine);
        coroutine.start();
        coroutine
    }

    /// Starts driving the routine on the calling thread.
    ///
    /// Returns at the first suspension or terminal step. Later calls are
    /// no-ops.
    pub fn start(&self) {
        {
            let mut driver = self.driver.lock();
            if driver.started {
                return;
            }
            driver.started = true;
        }
        tracing::trace!(future_id = %self.future.id(), "coroutine started");
        drive(&self.future, &self.driver, Resume::Start);
    }

    /// True once [`start`](Self::start) has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.driver.lock().started
    }

    /// True while a sub-future is outstanding.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.driver.lock().awaiting.is_some()
    }

    /// The coroutine's own future.
    #[must_use]
    pub fn future(&self) -> &Future<T> {
        &self.future
    }

    /// Blocks for the result; see [`Future::wait`].
    pub fn join(&self) -> Result<T> {
        self.future.wait()
    }
}

impl<T> Deref for Coroutine<T> {
    type Target = Future<T>;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<T> From<Coroutine<T>> for Future<T> {
    fn from(coroutine: Coroutine<T>) -> Self {
        coroutine.future
    }
}

impl<T: Clone + Send + 'static> Cancellable for Coroutine<T> {
    fn cancel(&self) -> bool {
        self.future.cancel()
    }

    fn is_ready(&self) -> bool {
        self.future.ready()
    }

    fn future_id(&self) -> FutureId {
        self.future.id()
    }
}

impl<T> fmt::Debug for Coroutine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let driver = self.driver.lock();
        f.debug_struct("Coroutine")
            .field("future", &self.future)
            .field("started", &driver.started)
            .field("suspended", &driver.awaiting.is_some())
            .finish()
    }
}

/// Runs the routine until it suspends or finishes.
fn drive<T>(future: &Future<T>, driver: &SharedDriver<T>, mut input: Resume)
where
    T: Clone + Send + 'static,
{
    loop {
        let taken = driver.lock().routine.take();
        let Some(mut routine) = taken else {
            return;
        };
        if future.ready() {
            return;
        }

        let step = match catch_unwind(|| routine.resume(input)) {
            Ok(step) => step,
            Err(payload) => {
                drop(routine);
                if let Some(exit) = host_exit(payload.as_ref()) {
                    tracing::warn!(
                        future_id = %future.id(),
                        code = exit.code,
                        "host exit raised inside coroutine; cancelling and re-raising"
                    );
                    future.cancel();
                    panic::resume_unwind(payload);
                }
                let failure = Failure::from_panic(PanicPayload::from_caught(payload.as_ref()));
                finish(future, future.set_failed(failure));
                return;
            }
        };
        tracing::trace!(future_id = %future.id(), step = ?step, "coroutine step");

        match step {
            Step::Yield(value) => {
                driver.lock().routine = Some(routine);
                input = Resume::Value(value);
            }
            Step::Await(awaitable) => {
                suspend(future, driver, routine, awaitable);
                return;
            }
            Step::Done(value) => {
                drop(routine);
                finish(future, future.set_done(value));
                return;
            }
            Step::Fail(failure) => {
                drop(routine);
                finish(future, future.set_failed(failure));
                return;
            }
            Step::Cancel => {
                drop(routine);
                future.cancel();
                return;
            }
        }
    }
}

fn finish<T>(future: &Future<T>, settled: Result<()>)
where
    T: Clone + Send + 'static,
{
    if let Err(err) = settled {
        tracing::error!(future_id = %future.id(), error = %err, "coroutine result rejected");
    }
}

/// Parks the routine and subscribes to `awaitable`.
fn suspend<T>(
    future: &Future<T>,
    driver: &SharedDriver<T>,
    routine: Box<dyn Routine<T>>,
    awaitable: Box<dyn Awaitable>,
) where
    T: Clone + Send + 'static,
{
    let epoch = {
        let mut state = driver.lock();
        state.routine = Some(routine);
        state.epoch += 1;
        state.epoch
    };
    tracing::trace!(
        future_id = %future.id(),
        awaiting = %awaitable.awaited_id(),
        "coroutine suspended"
    );

    let resume_future = future.clone();
    let resume_driver = Arc::clone(driver);
    awaitable.subscribe(Box::new(move |input| {
        let consumed = {
            let mut state = resume_driver.lock();
            if state.epoch != epoch {
                return;
            }
            state.epoch += 1;
            state.awaiting.take()
        };
        drop(consumed);
        drive(&resume_future, &resume_driver, input);
    }));

    // The outcome may already have been delivered while subscribing.
    let stale = {
        let mut state = driver.lock();
        if state.epoch == epoch {
            state.awaiting = Some(awaitable);
            None
        } else {
            Some(awaitable)
        }
    };

    if future.is_cancelled() {
        let stored = driver.lock().awaiting.take();
        for awaiting in stale.into_iter().chain(stored) {
            awaiting.cancel();
        }
    }
}

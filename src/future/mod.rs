//! Single-assignment result cells with scheduled callback delivery.
//!
//! A [`Future`] starts `Waiting` and moves exactly once to `Done`, `Failed`
//! or `Cancelled`. The producer resolves it with [`Future::set_done`],
//! [`Future::set_failed`] or [`Future::cancel`]; consumers [`bind`] callbacks
//! or block with [`Future::wait`].
//!
//! # Delivery
//!
//! Callbacks never run inline with the transition. The state change happens
//! under the future's lock, waiters are woken, and then, with the lock
//! released, every matching callback is posted through the future's
//! [`SchedulerHandle`]. Outcome callbacks are posted in binding order,
//! followed by the "finished" callbacks.
//!
//! Binding to a future that is already terminal posts the matching callback
//! immediately.
//!
//! # Unhandled failures
//!
//! A future dropped in the `Failed` state without ever having had a failure
//! or finished callback bound reports the failure with `tracing::error!`.
//!
//! [`bind`]: Future::bind

mod subscriber;

pub use subscriber::Subscriber;

use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind, Failure, Result};
use crate::runtime::scheduler::{Call, SchedulerHandle};
use crate::types::FutureId;
use subscriber::{CancelledFn, DoneFn, FailedFn, FinishedFn};

/// Observable state of a [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No outcome yet.
    Waiting,
    /// Resolved with a value.
    Done,
    /// Resolved with a [`Failure`].
    Failed,
    /// Cancelled before an outcome arrived.
    Cancelled,
}

impl Status {
    /// Returns true for `Done`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

enum State<T> {
    Waiting,
    Done(T),
    Failed(Failure),
    Cancelled,
}

impl<T> State<T> {
    const fn status(&self) -> Status {
        match self {
            Self::Waiting => Status::Waiting,
            Self::Done(_) => Status::Done,
            Self::Failed(_) => Status::Failed,
            Self::Cancelled => Status::Cancelled,
        }
    }
}

struct Callbacks<T> {
    done: Vec<DoneFn<T>>,
    failed: Vec<FailedFn>,
    cancelled: Vec<CancelledFn>,
    finished: Vec<FinishedFn<T>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            done: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            finished: Vec::new(),
        }
    }
}

impl<T: Clone + Send + 'static> Callbacks<T> {
    fn push(&mut self, subscriber: Subscriber<T>) {
        self.done.extend(subscriber.done);
        self.failed.extend(subscriber.failed);
        self.cancelled.extend(subscriber.cancelled);
        self.finished.extend(subscriber.finished);
    }

    /// Turns the callbacks matching `state` into posted calls.
    ///
    /// Non-matching callbacks stay behind so the caller can drop them after
    /// releasing the lock.
    fn deliver(&mut self, state: &State<T>, future: &Future<T>) -> Vec<Call> {
        let mut calls: Vec<Call> = Vec::new();
        match state {
            State::Waiting => return calls,
            State::Done(value) => {
                for callback in self.done.drain(..) {
                    let value = value.clone();
                    calls.push(Box::new(move || callback(value)));
                }
            }
            State::Failed(failure) => {
                for callback in self.failed.drain(..) {
                    let failure = failure.clone();
                    calls.push(Box::new(move || callback(failure)));
                }
            }
            State::Cancelled => {
                for callback in self.cancelled.drain(..) {
                    calls.push(callback);
                }
            }
        }
        for callback in self.finished.drain(..) {
            let future = future.clone();
            calls.push(Box::new(move || callback(future)));
        }
        calls
    }
}

struct Shared<T> {
    state: State<T>,
    callbacks: Callbacks<T>,
    handled: bool,
    cancel_hook: Option<Box<dyn FnOnce() + Send + 'static>>,
}

struct Inner<T> {
    id: FutureId,
    scheduler: SchedulerHandle,
    shared: Mutex<Shared<T>>,
    settled: Condvar,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        if let State::Failed(failure) = &shared.state {
            if !shared.handled {
                tracing::error!(
                    future_id = %self.id,
                    error = %failure,
                    trace = failure.trace(),
                    "unhandled failure in future"
                );
            }
        }
    }
}

/// Eventual result of one asynchronous operation.
///
/// Cloning is cheap and yields another handle to the same cell.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Everything a transition hands back for processing outside the lock.
struct Settled<T> {
    calls: Vec<Call>,
    unused: Callbacks<T>,
    hook: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Creates a waiting future whose callbacks are posted through `scheduler`.
    #[must_use]
    pub fn new(scheduler: &SchedulerHandle) -> Self {
        Self::with_state(scheduler, State::Waiting)
    }

    /// Creates a future that is already `Done` with `value`.
    #[must_use]
    pub fn completed(scheduler: &SchedulerHandle, value: T) -> Self {
        Self::with_state(scheduler, State::Done(value))
    }

    fn with_state(scheduler: &SchedulerHandle, state: State<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: FutureId::next(),
                scheduler: scheduler.clone(),
                shared: Mutex::new(Shared {
                    state,
                    callbacks: Callbacks::default(),
                    handled: false,
                    cancel_hook: None,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Returns this future's identifier.
    #[must_use]
    pub fn id(&self) -> FutureId {
        self.inner.id
    }

    /// Returns the scheduler that delivers this future's callbacks.
    #[must_use]
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }

    /// Resolves the future with `value`.
    ///
    /// A late result on a cancelled future is dropped and `Ok` is returned.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AlreadySet`] if the future is already `Done` or `Failed`.
    pub fn set_done(&self, value: T) -> Result<()> {
        self.settle(State::Done(value))
    }

    /// Resolves the future with `failure`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AlreadySet`] if the future is already `Done` or `Failed`.
    pub fn set_failed(&self, failure: Failure) -> Result<()> {
        self.settle(State::Failed(failure))
    }

    fn settle(&self, next: State<T>) -> Result<()> {
        let settled = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                State::Waiting => {}
                State::Cancelled => {
                    tracing::debug!(
                        future_id = %self.inner.id,
                        outcome = ?next.status(),
                        "late result dropped after cancellation"
                    );
                    return Ok(());
                }
                State::Done(_) | State::Failed(_) => {
                    return Err(Error::new(ErrorKind::AlreadySet).with_message(format!(
                        "future {} is already {:?}",
                        self.inner.id,
                        shared.state.status()
                    )));
                }
            }
            shared.state = next;
            self.inner.settled.notify_all();
            self.take_settled(&mut shared)
        };
        self.dispatch(settled);
        Ok(())
    }

    /// Cancels a waiting future.
    ///
    /// Returns true if this call performed the transition; cancelling a
    /// terminal future is a no-op.
    pub fn cancel(&self) -> bool {
        let settled = {
            let mut shared = self.inner.shared.lock();
            if !matches!(shared.state, State::Waiting) {
                return false;
            }
            shared.state = State::Cancelled;
            self.inner.settled.notify_all();
            self.take_settled(&mut shared)
        };
        tracing::trace!(future_id = %self.inner.id, "future cancelled");
        self.dispatch(settled);
        true
    }

    fn take_settled(&self, shared: &mut Shared<T>) -> Settled<T> {
        let mut unused = mem::take(&mut shared.callbacks);
        let calls = unused.deliver(&shared.state, self);
        Settled {
            calls,
            unused,
            hook: shared.cancel_hook.take(),
        }
    }

    fn dispatch(&self, settled: Settled<T>) {
        let Settled {
            calls,
            unused,
            hook,
        } = settled;
        if let Some(hook) = hook {
            if self.is_cancelled() {
                hook();
            }
        }
        drop(unused);
        for call in calls {
            self.inner.scheduler.post_boxed(call);
        }
    }

    /// Registers a hook run once, outside the lock, if the future is
    /// cancelled while waiting. Dropped on any other outcome.
    pub(crate) fn set_cancel_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self.inner.shared.lock();
        if matches!(shared.state, State::Waiting) {
            shared.cancel_hook = Some(Box::new(hook));
        }
    }

    /// Registers `subscriber`'s callbacks.
    ///
    /// Each callback fires at most once, posted through the scheduler. If the
    /// future is already terminal the matching callbacks are posted now.
    /// Binding a failure or finished callback marks a failure as handled.
    pub fn bind(&self, subscriber: Subscriber<T>) {
        let settled = {
            let mut shared = self.inner.shared.lock();
            if subscriber.handles_failure() {
                shared.handled = true;
            }
            shared.callbacks.push(subscriber);
            if matches!(shared.state, State::Waiting) {
                return;
            }
            self.take_settled(&mut shared)
        };
        self.dispatch(settled);
    }

    /// Binds a success callback.
    pub fn on_done<F>(&self, f: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.bind(Subscriber::new().on_done(f));
        self
    }

    /// Binds a failure callback, marking any failure as handled.
    pub fn on_failed<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Failure) + Send + 'static,
    {
        self.bind(Subscriber::new().on_failed(f));
        self
    }

    /// Binds a cancellation callback.
    pub fn on_cancelled<F>(&self, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.bind(Subscriber::new().on_cancelled(f));
        self
    }

    /// Binds a callback for any terminal outcome.
    pub fn on_finished<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Self) + Send + 'static,
    {
        self.bind(Subscriber::new().on_finished(f));
        self
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.shared.lock().state.status()
    }

    /// Returns true once the future is terminal.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns true if the future was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// Returns whether the future failed.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotReady`] while waiting, [`ErrorKind::Cancelled`] if
    /// cancelled.
    pub fn failed(&self) -> Result<bool> {
        match self.status() {
            Status::Waiting => Err(Error::not_ready()),
            Status::Cancelled => Err(Error::cancelled()),
            Status::Done => Ok(false),
            Status::Failed => Ok(true),
        }
    }

    /// Returns the value without blocking.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotReady`] while waiting, [`ErrorKind::Cancelled`] if
    /// cancelled, [`ErrorKind::Failed`] carrying the captured error if failed.
    pub fn result(&self) -> Result<T> {
        Self::outcome(&self.inner.shared.lock().state)
    }

    /// Returns the captured failure, if the future failed.
    #[must_use]
    pub fn failure(&self) -> Option<Failure> {
        match &self.inner.shared.lock().state {
            State::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Blocks the calling thread until the future is terminal.
    ///
    /// # Errors
    ///
    /// Same outcomes as [`result`](Self::result), plus
    /// [`ErrorKind::WaitOnSchedulerContext`] when called from the scheduler's
    /// own context on a future that is not yet terminal.
    pub fn wait(&self) -> Result<T> {
        self.wait_until(None)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotReady`] if the timeout elapses first.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<T> {
        if !self.ready() && self.inner.scheduler.is_current_context() {
            return Err(Error::new(ErrorKind::WaitOnSchedulerContext).with_message(format!(
                "blocking wait on future {} from the scheduler context",
                self.inner.id
            )));
        }

        let mut shared = self.inner.shared.lock();
        while matches!(shared.state, State::Waiting) {
            match deadline {
                None => self.inner.settled.wait(&mut shared),
                Some(deadline) => {
                    if self
                        .inner
                        .settled
                        .wait_until(&mut shared, deadline)
                        .timed_out()
                        && matches!(shared.state, State::Waiting)
                    {
                        return Err(Error::not_ready().with_message("wait timed out"));
                    }
                }
            }
        }
        Self::outcome(&shared.state)
    }

    fn outcome(state: &State<T>) -> Result<T> {
        match state {
            State::Waiting => Err(Error::not_ready()),
            State::Done(value) => Ok(value.clone()),
            State::Failed(failure) => Err(failure.to_error()),
            State::Cancelled => Err(Error::cancelled()),
        }
    }

    /// Returns a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakFuture<T> {
        WeakFuture {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("status", &self.inner.shared.lock().state.status())
            .finish()
    }
}

/// Non-owning handle to a [`Future`].
pub struct WeakFuture<T> {
    id: FutureId,
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakFuture<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakFuture<T> {
    /// Identifier of the referenced future.
    #[must_use]
    pub fn id(&self) -> FutureId {
        self.id
    }

    /// Returns a strong handle if the future is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Future<T>> {
        self.inner.upgrade().map(|inner| Future { inner })
    }

    /// Returns true while some strong handle exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> fmt::Debug for WeakFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakFuture")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Type-erased cancellation handle.
///
/// Lets queues and managers hold futures of different value types.
pub trait Cancellable: Send + Sync {
    /// Cancels the target; returns true if this call performed the transition.
    fn cancel(&self) -> bool;

    /// True once the target is terminal, or gone.
    fn is_ready(&self) -> bool;

    /// Identifier of the target.
    fn future_id(&self) -> FutureId;
}

impl<T: Clone + Send + 'static> Cancellable for Future<T> {
    fn cancel(&self) -> bool {
        Self::cancel(self)
    }

    fn is_ready(&self) -> bool {
        self.ready()
    }

    fn future_id(&self) -> FutureId {
        self.id()
    }
}

impl<T: Clone + Send + 'static> Cancellable for WeakFuture<T> {
    fn cancel(&self) -> bool {
        self.upgrade().is_some_and(|future| future.cancel())
    }

    fn is_ready(&self) -> bool {
        self.upgrade().map_or(true, |future| future.ready())
    }

    fn future_id(&self) -> FutureId {
        self.id
    }
}

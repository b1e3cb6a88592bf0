//! Callback bundles bound to a [`Future`].

use core::fmt;

use super::Future;
use crate::error::Failure;

pub(crate) type DoneFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
pub(crate) type FailedFn = Box<dyn FnOnce(Failure) + Send + 'static>;
pub(crate) type CancelledFn = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type FinishedFn<T> = Box<dyn FnOnce(Future<T>) + Send + 'static>;

/// A set of optional outcome callbacks, registered together with
/// [`Future::bind`].
///
/// ```ignore
/// future.bind(
///     Subscriber::new()
///         .on_done(|v| println!("got {v}"))
///         .on_failed(|f| eprintln!("failed: {f}")),
/// );
/// ```
pub struct Subscriber<T> {
    pub(crate) done: Option<DoneFn<T>>,
    pub(crate) failed: Option<FailedFn>,
    pub(crate) cancelled: Option<CancelledFn>,
    pub(crate) finished: Option<FinishedFn<T>>,
}

impl<T> Subscriber<T> {
    /// Creates an empty subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self {
            done: None,
            failed: None,
            cancelled: None,
            finished: None,
        }
    }

    /// Runs `f` with the value when the future completes successfully.
    #[must_use]
    pub fn on_done<F>(mut self, f: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.done = Some(Box::new(f));
        self
    }

    /// Runs `f` with the captured failure.
    #[must_use]
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Failure) + Send + 'static,
    {
        self.failed = Some(Box::new(f));
        self
    }

    /// Runs `f` if the future is cancelled.
    #[must_use]
    pub fn on_cancelled<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancelled = Some(Box::new(f));
        self
    }

    /// Runs `f` after any terminal outcome, once the outcome callbacks have
    /// been posted.
    #[must_use]
    pub fn on_finished<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Future<T>) + Send + 'static,
    {
        self.finished = Some(Box::new(f));
        self
    }

    /// True if binding this subscriber counts as handling a failure.
    #[must_use]
    pub fn handles_failure(&self) -> bool {
        self.failed.is_some() || self.finished.is_some()
    }

    /// True if no callback is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.done.is_none()
            && self.failed.is_none()
            && self.cancelled.is_none()
            && self.finished.is_none()
    }
}

impl<T> Default for Subscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("done", &self.done.is_some())
            .field("failed", &self.failed.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .field("finished", &self.finished.is_some())
            .finish()
    }
}

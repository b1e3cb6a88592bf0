//! Step-driven coroutine bodies.
//!
//! A coroutine body is a [`Routine`]: a state machine the driver resumes with
//! a [`Resume`] input and that answers with the next [`Step`]. The first
//! resume carries [`Resume::Start`]; every later one carries the outcome of
//! the awaited future (or the value the routine yielded to itself).
//!
//! Values crossing an await are type-erased as [`AnyValue`] and recovered
//! with [`Resume::take`], which turns failure and cancellation into an
//! [`Interrupt`]. Returning the interrupt (`Step::from(interrupt)`) lets it
//! propagate as the coroutine's own outcome; matching on it lets the routine
//! recover instead.

use std::any::{type_name, Any, TypeId};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, ErrorKind, Failure};
use crate::future::{Future, Subscriber};
use crate::types::FutureId;

/// A type-erased value passed between steps.
pub type AnyValue = Box<dyn Any + Send>;

/// Input handed to a routine when it is resumed.
pub enum Resume {
    /// First resume after `start()`.
    Start,
    /// The awaited future completed, or the routine yielded a value.
    Value(AnyValue),
    /// The awaited future failed.
    Failed(Failure),
    /// The awaited future was cancelled.
    Cancelled,
}

impl Resume {
    /// Recovers the resumed value as a `U`.
    ///
    /// `Start` counts as the unit value, so `take::<()>()` succeeds on it.
    ///
    /// # Errors
    ///
    /// [`Interrupt::Failed`] for a failed await or a value of another type,
    /// [`Interrupt::Cancelled`] for a cancelled await.
    pub fn take<U: 'static>(self) -> Result<U, Interrupt> {
        let value: AnyValue = match self {
            Self::Start => Box::new(()),
            Self::Value(value) => value,
            Self::Failed(failure) => return Err(Interrupt::Failed(failure)),
            Self::Cancelled => return Err(Interrupt::Cancelled),
        };
        value.downcast::<U>().map(|boxed| *boxed).map_err(|_| {
            Interrupt::Failed(Failure::new(
                Error::new(ErrorKind::TypeMismatch)
                    .with_message(format!("resumed value is not a {}", type_name::<U>())),
            ))
        })
    }

    /// Takes a `U` and continues with `next`; an interrupt propagates.
    pub fn then<U, T, F>(self, next: F) -> Step<T>
    where
        U: 'static,
        F: FnOnce(U) -> Step<T>,
    {
        match self.take::<U>() {
            Ok(value) => next(value),
            Err(interrupt) => interrupt.into(),
        }
    }

    /// True for the initial resume.
    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// A failure or cancellation raised into a routine.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// The awaited work failed.
    Failed(Failure),
    /// The awaited work was cancelled.
    Cancelled,
}

impl<T> From<Interrupt> for Step<T> {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Failed(failure) => Self::Fail(failure),
            Interrupt::Cancelled => Self::Cancel,
        }
    }
}

/// What a routine wants to happen next.
pub enum Step<T> {
    /// Suspend until the future resolves.
    Await(Box<dyn Awaitable>),
    /// Resume immediately with this value.
    Yield(AnyValue),
    /// Finish with a value.
    Done(T),
    /// Finish with a failure.
    Fail(Failure),
    /// Finish cancelled.
    Cancel,
}

impl<T> Step<T> {
    /// Awaits `future`; its value resumes the routine as a `U`.
    pub fn await_on<U: Clone + Send + 'static>(future: &Future<U>) -> Self {
        Self::Await(Box::new(future.clone()))
    }

    /// Feeds `value` straight back into the routine.
    pub fn yield_value<U: Send + 'static>(value: U) -> Self {
        Self::Yield(Box::new(value))
    }

    /// Finishes with `error` as the failure.
    pub fn fail(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Fail(Failure::new(error))
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Await(awaitable) => f.debug_tuple("Await").field(&awaitable.awaited_id()).finish(),
            Self::Yield(_) => f.write_str("Yield(..)"),
            Self::Done(_) => f.write_str("Done(..)"),
            Self::Fail(failure) => f.debug_tuple("Fail").field(failure).finish(),
            Self::Cancel => f.write_str("Cancel"),
        }
    }
}

/// Something a coroutine can suspend on.
pub trait Awaitable: Send {
    /// Arranges for `resume` to run once with the outcome.
    fn subscribe(&self, resume: Box<dyn FnOnce(Resume) + Send + 'static>);

    /// Cancels the awaited work.
    fn cancel(&self) -> bool;

    /// Identifier used in logs.
    fn awaited_id(&self) -> FutureId;
}

impl<U: Clone + Send + 'static> Awaitable for Future<U> {
    fn subscribe(&self, resume: Box<dyn FnOnce(Resume) + Send + 'static>) {
        let slot = std::sync::Arc::new(parking_lot::Mutex::new(Some(resume)));
        let on_done = std::sync::Arc::clone(&slot);
        let on_failed = std::sync::Arc::clone(&slot);
        let on_cancelled = slot;
        self.bind(
            Subscriber::new()
                .on_done(move |value| {
                    let resume = on_done.lock().take();
                    if let Some(resume) = resume {
                        resume(Resume::Value(Box::new(value)));
                    }
                })
                .on_failed(move |failure| {
                    let resume = on_failed.lock().take();
                    if let Some(resume) = resume {
                        resume(Resume::Failed(failure));
                    }
                })
                .on_cancelled(move || {
                    let resume = on_cancelled.lock().take();
                    if let Some(resume) = resume {
                        resume(Resume::Cancelled);
                    }
                }),
        );
    }

    fn cancel(&self) -> bool {
        Self::cancel(self)
    }

    fn awaited_id(&self) -> FutureId {
        self.id()
    }
}

/// A resumable coroutine body.
pub trait Routine<T>: Send + 'static {
    /// Advances the body with `input` and returns what to do next.
    fn resume(&mut self, input: Resume) -> Step<T>;
}

impl<T, F> Routine<T> for F
where
    F: FnMut(Resume) -> Step<T> + Send + 'static,
{
    fn resume(&mut self, input: Resume) -> Step<T> {
        self(input)
    }
}

type StepFn<T> = Box<dyn FnOnce(Resume) -> Step<T> + Send + 'static>;

/// An ordered list of one-shot steps.
///
/// Each step receives the outcome of the previous one. When the list runs
/// out, the last resumed value becomes the result.
///
/// An empty list started with [`Resume::Start`] has no value to finish with:
/// `Steps<()>` finishes `Done(())`, any other `T` fails with
/// [`ErrorKind::TypeMismatch`] naming the missing type.
///
/// ```ignore
/// let routine = Steps::new()
///     .then(move |_| Step::await_on(&a))
///     .then(move |r| r.then(|x: i32| Step::await_on(&sched.async_call(move || x + 1))));
/// // finishes Done(x + 1)
/// ```
pub struct Steps<T> {
    steps: VecDeque<StepFn<T>>,
}

impl<T: Send + 'static> Steps<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn then<F>(mut self, step: F) -> Self
    where
        F: FnOnce(Resume) -> Step<T> + Send + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    /// Number of steps not yet run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl<T: Send + 'static> Default for Steps<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Routine<T> for Steps<T> {
    fn resume(&mut self, input: Resume) -> Step<T> {
        match self.steps.pop_front() {
            Some(step) => step(input),
            None => match input {
                Resume::Start if TypeId::of::<T>() != TypeId::of::<()>() => Step::fail(
                    Error::new(ErrorKind::TypeMismatch).with_message(format!(
                        "empty steps list cannot produce a {}",
                        type_name::<T>()
                    )),
                ),
                input => input.then(Step::Done),
            },
        }
    }
}

impl<T> fmt::Debug for Steps<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Steps")
            .field("remaining", &self.steps.len())
            .finish()
    }
}

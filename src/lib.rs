//! Cofuture: futures, coroutines, and a bounded blocking pool for keeping
//! background work off a serialized host thread.
//!
//! # Overview
//!
//! Hosts with a single serialized execution context (a UI thread, an event
//! loop) offload blocking calls to a thread pool and consume the results as
//! callbacks that run back on that context. Cofuture provides the pieces:
//!
//! - A [`Future`] is a single-assignment result cell. Its callbacks are always
//!   posted through a [`Scheduler`], never run inline with the producer.
//! - A [`Coroutine`] drives a step-by-step [`Routine`] that can suspend on
//!   other futures, so multi-stage background work reads sequentially.
//! - A [`ThreadPool`] runs blocking calls on a capped, lazily grown set of
//!   workers and resolves their futures.
//! - [`CoroutineQueue`] runs related coroutines one at a time;
//!   [`CoroutineManager`] cancels a group of them on owner teardown.
//!
//! # Core Guarantees
//!
//! - **Single assignment**: a future changes state once; a second result is
//!   an `AlreadySet` error, a late result after cancellation is dropped
//! - **Scheduled delivery**: callbacks fire once each, in binding order, via
//!   the scheduler
//! - **Propagating cancellation**: cancelling a coroutine cancels the future
//!   it is suspended on
//! - **Captured failures**: errors and panics in pool calls and coroutine
//!   bodies become `Failed`; only a host-exit unwind escapes
//! - **Visible leaks**: a failed future nobody subscribed to is logged when
//!   dropped
//!
//! # Module Structure
//!
//! - [`future`]: the result cell, subscribers and weak handles
//! - [`coroutine`]: routines, the coroutine driver, queue and manager
//! - [`runtime`]: schedulers, the thread pool and configuration
//! - [`types`]: identifiers and panic capture
//! - [`error`]: error types
//! - [`test_utils`]: helpers shared by unit and integration tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod coroutine;
pub mod error;
pub mod future;
pub mod runtime;
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use coroutine::{
    AnyValue, Awaitable, Coroutine, CoroutineManager, CoroutineQueue, Interrupt, Resume, Routine,
    Step, Steps,
};
pub use error::{Error, ErrorCategory, ErrorKind, Failure, Result};
pub use future::{Cancellable, Future, Status, Subscriber, WeakFuture};
pub use runtime::{
    ConfigError, ImmediateScheduler, PoolConfig, PoolStats, RunLoopScheduler, Scheduler,
    SchedulerHandle, ThreadPool, ThreadPoolOptions,
};
pub use types::{FutureId, HostExit, PanicPayload};

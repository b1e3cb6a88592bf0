//! Error types and error handling strategy for cofuture.
//!
//! Errors fall into three categories, classified by [`ErrorCategory`]:
//!
//! - **Programmer**: misuse of the runtime (setting a result twice, installing
//!   a second scheduler, blocking on the scheduler's own context). These are
//!   surfaced immediately at the call site.
//! - **Operation**: the awaited work itself failed. The failure is captured in
//!   a [`Failure`] and delivered to the future's failure subscribers.
//! - **Cancellation**: a distinct terminal state, never conflated with failure.
//!
//! A [`Failure`] is the payload of a `Failed` future. It is shared between all
//! subscribers, so it wraps the underlying error in an `Arc` and carries a
//! human-readable trace for diagnostics.

use core::fmt;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use crate::types::PanicPayload;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The future was cancelled.
    Cancelled,

    // === Operation ===
    /// The awaited operation failed; the source carries the captured error.
    Failed,

    // === Programmer ===
    /// The future has not reached a terminal state yet.
    NotReady,
    /// A result was set on a future that already holds one.
    AlreadySet,
    /// A coroutine resumed with a value of an unexpected type.
    TypeMismatch,
    /// A process-wide scheduler was installed twice.
    SchedulerAlreadyInstalled,
    /// A blocking wait was attempted on the scheduler's own execution context.
    WaitOnSchedulerContext,
    /// Configuration value was rejected.
    InvalidConfig,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Failed | Self::User => ErrorCategory::Operation,
            Self::NotReady
            | Self::AlreadySet
            | Self::TypeMismatch
            | Self::SchedulerAlreadyInstalled
            | Self::WaitOnSchedulerContext
            | Self::InvalidConfig => ErrorCategory::Programmer,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Misuse of the runtime; not recoverable at the call site.
    Programmer,
    /// The awaited work failed.
    Operation,
    /// The operation was cancelled.
    Cancellation,
}

/// The main error type for cofuture operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error carries an operation failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.kind, ErrorKind::Failed)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    fn with_shared_source(mut self, source: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a not-ready error.
    #[must_use]
    pub const fn not_ready() -> Self {
        Self::new(ErrorKind::NotReady)
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Captured failure of an asynchronous operation.
///
/// Cloning is cheap; every subscriber of a failed future observes the same
/// underlying error value.
#[derive(Clone)]
pub struct Failure {
    error: Arc<dyn std::error::Error + Send + Sync>,
    trace: Arc<str>,
}

impl Failure {
    /// Captures `error` together with a backtrace of the current thread.
    ///
    /// The backtrace honours `RUST_BACKTRACE`; when capture is disabled the
    /// trace falls back to the error's display form.
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        let backtrace = Backtrace::capture();
        let trace = match backtrace.status() {
            BacktraceStatus::Captured => backtrace.to_string(),
            _ => error.to_string(),
        };
        Self::with_trace(error, trace)
    }

    /// Builds a failure with an explicit trace string.
    pub fn with_trace(
        error: impl std::error::Error + Send + Sync + 'static,
        trace: impl Into<String>,
    ) -> Self {
        let trace: String = trace.into();
        Self {
            error: Arc::new(error),
            trace: Arc::from(trace),
        }
    }

    /// Builds a failure from a caught panic.
    #[must_use]
    pub fn from_panic(payload: PanicPayload) -> Self {
        let trace = payload.location().map_or_else(
            || payload.message().to_string(),
            |loc| format!("{} at {loc}", payload.message()),
        );
        Self::with_trace(payload, trace)
    }

    /// Returns the captured error.
    #[must_use]
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Attempts to view the captured error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Returns the human-readable trace recorded at capture time.
    #[must_use]
    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// Converts this failure into an [`Error`] of kind [`ErrorKind::Failed`].
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::new(ErrorKind::Failed)
            .with_message(self.error.to_string())
            .with_shared_source(Arc::clone(&self.error))
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("error", &self.error.to_string())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Self::new(err)
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        failure.to_error()
    }
}

/// A specialized Result type for cofuture operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

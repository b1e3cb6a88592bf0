//! Test utilities for cofuture.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Scheduler constructors
//! - Log capture for asserting on emitted diagnostics
//!
//! # Example
//! ```
//! use cofuture::test_utils::{init_test_logging, test_run_loop};
//!
//! init_test_logging();
//! let (run_loop, sched) = test_run_loop();
//! let future = sched.async_call(|| 2 + 2);
//! run_loop.run_until(|| future.ready(), std::time::Duration::from_secs(5));
//! assert_eq!(future.result().unwrap(), 4);
//! ```

use parking_lot::Mutex as BufMutex;
use std::io;
use std::sync::{Arc, Once};
#[cfg(test)]
use std::sync::{Mutex, PoisonError};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;

use crate::runtime::{ImmediateScheduler, RunLoopScheduler, SchedulerHandle, ThreadPool};

static INIT_LOGGING: Once = Once::new();
#[cfg(test)]
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Worker cap used by the scheduler constructors below.
pub const TEST_POOL_THREADS: usize = 4;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a run loop owned by the calling thread, plus its handle.
#[must_use]
pub fn test_run_loop() -> (Arc<RunLoopScheduler>, SchedulerHandle) {
    let run_loop = RunLoopScheduler::new(ThreadPool::new(TEST_POOL_THREADS));
    let handle = run_loop.handle();
    (run_loop, handle)
}

/// Create a scheduler that runs posted calls inline.
#[must_use]
pub fn test_immediate() -> SchedulerHandle {
    ImmediateScheduler::handle(ThreadPool::new(TEST_POOL_THREADS))
}

/// In-memory sink for formatted `tracing` output.
///
/// Events are captured only inside [`LogCapture::run`], on the calling thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<BufMutex<Vec<u8>>>,
}

/// Writer handed out by [`LogCapture`].
#[derive(Debug)]
pub struct CaptureWriter {
    buf: Arc<BufMutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

impl LogCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with this capture as the thread's default subscriber.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// True if the captured output contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

impl std::fmt::Debug for LogCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCapture")
            .field("bytes", &self.buf.lock().len())
            .finish()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a future settled with a specific value.
#[macro_export]
macro_rules! assert_done {
    ($future:expr, $expected:expr) => {
        match $future.result() {
            Ok(v) => assert_eq!(v, $expected),
            Err(other) => unreachable!("expected Done({:?}), got {}", $expected, other),
        }
    };
}

/// Assert that a future was cancelled.
#[macro_export]
macro_rules! assert_cancelled {
    ($future:expr) => {
        assert_eq!($future.status(), $crate::future::Status::Cancelled);
    };
}

/// Assert that a future failed.
#[macro_export]
macro_rules! assert_failed {
    ($future:expr) => {
        assert_eq!($future.status(), $crate::future::Status::Failed);
    };
}

//! Panic capture and the host-exit signal.
//!
//! Panics raised by submitted work or by a coroutine body are the Rust
//! counterpart of an ordinary exception: they are caught and turned into a
//! `Failed` future. The one exception is [`HostExit`], the payload used to ask
//! the host process to terminate. It is never captured as a failure; the
//! future it interrupts is cancelled and the unwind continues.
//!
//! [`catch_unwind`] installs a chained panic hook once per process. The hook
//! records the panic location in a thread-local slot before delegating to the
//! previously installed hook, so [`PanicPayload::from_caught`] can attach it.

use core::fmt;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static LAST_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

static LOCATION_HOOK: Once = Once::new();

fn install_location_hook() {
    LOCATION_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                LAST_LOCATION.with(|slot| *slot.borrow_mut() = Some(location.to_string()));
            }
            previous(info);
        }));
    });
}

/// Runs `f`, catching any unwind and remembering where a panic was raised.
///
/// Pair with [`PanicPayload::from_caught`] on the same thread.
pub fn catch_unwind<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    install_location_hook();
    LAST_LOCATION.with(|slot| slot.borrow_mut().take());
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Takes the location recorded for the last panic on this thread.
fn take_location() -> Option<String> {
    LAST_LOCATION.with(|slot| slot.borrow_mut().take())
}

/// Payload from a caught panic.
///
/// This wraps the panic value for safe transport across thread boundaries.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
    location: Option<String>,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Records where the panic was raised.
    #[must_use]
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Extracts the message from a raw `catch_unwind` payload.
    #[must_use]
    pub fn from_any(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::new(message)
    }

    /// Like [`from_any`](Self::from_any), adding the location recorded by
    /// [`catch_unwind`] on this thread.
    #[must_use]
    pub fn from_caught(payload: &(dyn Any + Send)) -> Self {
        let caught = Self::from_any(payload);
        match take_location() {
            Some(location) => caught.at(location),
            None => caught,
        }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the recorded location, if any.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicPayload {}

/// Unrecoverable request to terminate the host process.
///
/// Raised with [`request_exit`]. Worker threads and coroutine drivers cancel
/// the affected future and re-raise this payload instead of recording it as
/// a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostExit {
    /// Exit status requested by the raiser.
    pub code: i32,
}

impl fmt::Display for HostExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host exit requested (code {})", self.code)
    }
}

/// Unwinds the current thread with a [`HostExit`] payload.
///
/// Does not invoke the panic hook.
pub fn request_exit(code: i32) -> ! {
    panic::resume_unwind(Box::new(HostExit { code }))
}

/// Returns the host-exit request carried by a panic payload, if any.
#[must_use]
pub fn host_exit(payload: &(dyn Any + Send)) -> Option<HostExit> {
    payload.downcast_ref::<HostExit>().copied()
}

//! Core types shared by the runtime.
//!
//! - [`id`]: identifier types (`FutureId`)
//! - [`panic`]: panic capture and the host-exit signal

pub mod id;
pub mod panic;

pub use id::FutureId;
pub use panic::{catch_unwind, host_exit, request_exit, HostExit, PanicPayload};

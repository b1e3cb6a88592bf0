//! Scheduling and blocking-work execution.
//!
//! This module contains the runtime machinery that futures and coroutines sit
//! on:
//!
//! - [`scheduler`]: the [`Scheduler`] contract, [`SchedulerHandle`], the
//!   inline [`ImmediateScheduler`] and the write-once process-wide slot
//! - [`run_loop`]: a serialized run loop for hosts with an event thread
//! - [`thread_pool`]: bounded, lazily grown pool for blocking calls
//! - [`config`]: pool configuration types
//! - [`env_config`]: environment variable and TOML overrides
//!
//! # Quick Start
//!
//! ```ignore
//! use cofuture::runtime::{PoolConfig, RunLoopScheduler, ThreadPool};
//!
//! let run_loop = RunLoopScheduler::new(ThreadPool::from_config(&PoolConfig::from_env()?));
//! let sched = run_loop.handle();
//! let sum = sched.async_call(|| 3 + 4);
//! sum.on_done(|v| println!("sum = {v}"));
//! run_loop.run_until(|| sum.ready(), std::time::Duration::from_secs(1));
//! ```

pub mod config;
pub mod env_config;
pub mod run_loop;
pub mod scheduler;
pub mod thread_pool;

pub use config::{ConfigError, PoolConfig};
pub use run_loop::RunLoopScheduler;
pub use scheduler::{
    async_call, current, install, installed, post_call, Call, ImmediateScheduler, Scheduler,
    SchedulerHandle,
};
pub use thread_pool::{PoolStats, ThreadPool, ThreadPoolOptions};

//! Thread pool for executing blocking calls.
//!
//! This module provides the pool behind [`SchedulerHandle::async_call`]. Each
//! submitted call is paired with a [`Future`] that the worker resolves:
//!
//! - **Capacity management**: threads are spawned lazily, only when no worker
//!   is idle, and never beyond `max_threads`
//! - **Retirement**: a worker idle for longer than `idle_timeout` with an empty
//!   queue exits and deregisters itself
//! - **Fairness**: pending calls are serviced in FIFO order
//! - **Shutdown**: [`ThreadPool::shutdown`] drains queued calls, then joins
//!   every worker; calling it again is a no-op
//!
//! ## Failure capture
//!
//! An `Err` returned by the call, or a panic raised inside it, resolves the
//! paired future as failed; the worker keeps running. A [`HostExit`] unwind
//! cancels the paired future and is re-raised, terminating that worker.
//!
//! ## Cancellation
//!
//! Blocking calls cannot be interrupted. Cancelling a future after submission
//! only suppresses its callbacks; the call still runs to completion and its
//! late result is dropped.
//!
//! [`HostExit`]: crate::types::HostExit

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Failure;
use crate::future::Future;
use crate::runtime::config::PoolConfig;
use crate::runtime::scheduler::SchedulerHandle;
use crate::types::{catch_unwind, host_exit, PanicPayload};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Address of the pool whose worker loop runs on this thread, or 0.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// The thread pool for blocking calls.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ThreadPool")
            .field("max_threads", &self.inner.max_threads)
            .field("live", &stats.live)
            .field("idle", &stats.idle)
            .field("pending", &stats.pending)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

struct PoolInner {
    /// Maximum number of threads allowed.
    max_threads: usize,
    /// Idle timeout before a worker retires.
    idle_timeout: Duration,
    /// Thread name prefix.
    thread_name_prefix: String,
    /// Callback when a thread starts.
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback when a thread stops.
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Work queue.
    queue: SegQueue<Job>,
    /// Number of pending calls in queue.
    pending: AtomicUsize,
    /// Number of calls that ran to completion.
    completed: AtomicU64,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Thread accounting; also the mutex for both condition variables.
    threads: Mutex<ThreadSet>,
    /// Signalled when work is queued or shutdown begins.
    work_ready: Condvar,
    /// Signalled whenever a worker deregisters.
    worker_exited: Condvar,
}

#[derive(Default)]
struct ThreadSet {
    live: usize,
    idle: usize,
    peak: usize,
    next_worker: usize,
    handles: HashMap<usize, JoinHandle<()>>,
}

/// Point-in-time counters for a [`ThreadPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Worker threads currently alive.
    pub live: usize,
    /// Workers parked waiting for work.
    pub idle: usize,
    /// Calls queued but not yet started.
    pub pending: usize,
    /// Highest number of simultaneously live workers observed.
    pub peak: usize,
    /// Calls that ran to completion.
    pub completed: u64,
}

/// Configuration options for the thread pool.
#[derive(Clone)]
pub struct ThreadPoolOptions {
    /// Maximum number of worker threads.
    pub max_threads: usize,
    /// Idle timeout before a worker retires.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Callback when a thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback when a thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for ThreadPoolOptions {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for ThreadPoolOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_threads: config.max_threads,
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix.clone(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for ThreadPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolOptions")
            .field("max_threads", &self.max_threads)
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool that grows up to `max_threads` workers.
    ///
    /// A cap of 0 is normalized to 1.
    #[must_use]
    pub fn new(max_threads: usize) -> Self {
        Self::with_options(ThreadPoolOptions {
            max_threads,
            ..ThreadPoolOptions::default()
        })
    }

    /// Creates a pool from a normalized [`PoolConfig`].
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::with_options(ThreadPoolOptions::from(config))
    }

    /// Creates a pool with custom options.
    #[must_use]
    pub fn with_options(options: ThreadPoolOptions) -> Self {
        let max_threads = options.max_threads.max(1);
        let inner = Arc::new(PoolInner {
            max_threads,
            idle_timeout: options.idle_timeout,
            thread_name_prefix: options.thread_name_prefix,
            on_thread_start: options.on_thread_start,
            on_thread_stop: options.on_thread_stop,
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(ThreadSet::default()),
            work_ready: Condvar::new(),
            worker_exited: Condvar::new(),
        });
        Self { inner }
    }

    /// Submits `call`, returning the future its worker resolves.
    ///
    /// A panic inside `call` resolves the future as failed.
    pub fn submit<T, F>(&self, scheduler: &SchedulerHandle, call: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.try_submit(scheduler, move || {
            Ok::<T, std::convert::Infallible>(call())
        })
    }

    /// Submits a fallible `call`; `Err` resolves the future as failed.
    ///
    /// After [`shutdown`](Self::shutdown) the call is dropped and the returned
    /// future is already cancelled.
    pub fn try_submit<T, E, F>(&self, scheduler: &SchedulerHandle, call: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let future = Future::new(scheduler);
        if self.is_shutdown() {
            tracing::warn!(future_id = %future.id(), "call submitted after pool shutdown; cancelling");
            future.cancel();
            return future;
        }

        let producer = future.clone();
        self.execute(Box::new(move || run_call(&producer, call)));
        future
    }

    fn execute(&self, job: Job) {
        // Counted before the push so a fast worker never decrements below zero.
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push(job);

        let mut threads = self.inner.threads.lock();
        if threads.idle > 0 {
            self.inner.work_ready.notify_one();
        } else if threads.live < self.inner.max_threads {
            spawn_worker(&self.inner, &mut threads);
        }
    }

    /// Returns the number of pending calls in the queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.threads.lock().live
    }

    /// Returns the configured thread cap.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let threads = self.inner.threads.lock();
        PoolStats {
            live: threads.live,
            idle: threads.idle,
            pending: self.inner.pending.load(Ordering::Relaxed),
            peak: threads.peak,
            completed: self.inner.completed.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops the pool and blocks until every worker thread has exited.
    ///
    /// Calls already queued still run. When invoked from one of this pool's
    /// own workers, that worker is not waited for.
    pub fn shutdown(&self) {
        let first = !self.inner.shutdown.swap(true, Ordering::AcqRel);
        let on_worker = WORKER_OF.with(Cell::get) == Arc::as_ptr(&self.inner) as usize;
        let own_thread = thread::current().id();

        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self.inner.threads.lock();
            self.inner.work_ready.notify_all();
            let floor = usize::from(on_worker);
            while threads.live > floor {
                self.inner.worker_exited.wait(&mut threads);
            }
            threads.handles.drain().map(|(_, handle)| handle).collect()
        };

        for handle in handles {
            if handle.thread().id() == own_thread {
                continue;
            }
            if let Err(payload) = handle.join() {
                match host_exit(payload.as_ref()) {
                    Some(exit) => tracing::warn!(code = exit.code, "worker terminated by host exit"),
                    None => tracing::error!(
                        panic = %PanicPayload::from_any(payload.as_ref()),
                        "worker terminated by panic"
                    ),
                }
            }
        }

        if first {
            tracing::debug!(
                completed = self.inner.completed.load(Ordering::Relaxed),
                "thread pool shut down"
            );
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one submitted call and resolves its future.
fn run_call<T, E, F>(future: &Future<T>, call: F)
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: FnOnce() -> Result<T, E>,
{
    let outcome = catch_unwind(call);
    let settled = match outcome {
        Ok(Ok(value)) => future.set_done(value),
        Ok(Err(err)) => future.set_failed(Failure::new(err)),
        Err(payload) => {
            if let Some(exit) = host_exit(payload.as_ref()) {
                tracing::warn!(
                    future_id = %future.id(),
                    code = exit.code,
                    "host exit raised by blocking call; cancelling and re-raising"
                );
                future.cancel();
                panic::resume_unwind(payload);
            }
            let panic = PanicPayload::from_caught(payload.as_ref());
            future.set_failed(Failure::from_panic(panic))
        }
    };
    if let Err(err) = settled {
        tracing::error!(future_id = %future.id(), error = %err, "pool result rejected");
    }
}

/// Spawns a worker; the caller holds the thread-set lock.
fn spawn_worker(inner: &Arc<PoolInner>, threads: &mut ThreadSet) {
    let worker = threads.next_worker;
    threads.next_worker += 1;
    let name = format!("{}-worker-{}", inner.thread_name_prefix, worker);
    let pool = Arc::clone(inner);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        WORKER_OF.with(|w| w.set(Arc::as_ptr(&pool) as usize));
        if let Some(ref callback) = pool.on_thread_start {
            callback();
        }

        worker_loop(&pool, worker);

        if let Some(ref callback) = pool.on_thread_stop {
            callback();
        }
    });

    match spawned {
        Ok(handle) => {
            threads.live += 1;
            threads.peak = threads.peak.max(threads.live);
            threads.handles.insert(worker, handle);
            tracing::debug!(worker, live = threads.live, "pool worker spawned");
        }
        Err(err) => {
            tracing::error!(worker, error = %err, "failed to spawn pool worker");
        }
    }
}

/// Deregisters a worker exactly once, including when it unwinds.
struct WorkerRegistration<'a> {
    inner: &'a PoolInner,
    worker: usize,
    retired: bool,
}

impl WorkerRegistration<'_> {
    fn retire(&mut self, threads: &mut ThreadSet, reason: &'static str) {
        threads.live -= 1;
        if !self.inner.shutdown.load(Ordering::Acquire) {
            // Detach; nobody will join an idle-retired worker.
            threads.handles.remove(&self.worker);
        }
        self.retired = true;
        self.inner.worker_exited.notify_all();
        tracing::debug!(worker = self.worker, live = threads.live, reason, "pool worker exiting");
    }
}

impl Drop for WorkerRegistration<'_> {
    fn drop(&mut self) {
        if !self.retired {
            let inner = self.inner;
            let mut threads = inner.threads.lock();
            self.retire(&mut threads, "unwind");
        }
    }
}

/// The worker loop for pool threads.
fn worker_loop(inner: &PoolInner, worker: usize) {
    let mut registration = WorkerRegistration {
        inner,
        worker,
        retired: false,
    };

    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            tracing::trace!(worker, "running pool call");
            job();
            inner.completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let mut threads = inner.threads.lock();
        if !inner.queue.is_empty() {
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            registration.retire(&mut threads, "shutdown");
            return;
        }

        threads.idle += 1;
        let timed_out = inner
            .work_ready
            .wait_for(&mut threads, inner.idle_timeout)
            .timed_out();
        threads.idle -= 1;

        if timed_out && inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            registration.retire(&mut threads, "idle");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::ImmediateScheduler;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicI32;

    fn scheduler(pool: ThreadPool) -> SchedulerHandle {
        ImmediateScheduler::handle(pool)
    }

    #[test]
    fn basic_submit_and_wait() {
        let sched = scheduler(ThreadPool::new(4));
        let counter = Arc::new(AtomicI32::new(0));

        let c = Arc::clone(&counter);
        let future = sched.pool().submit(&sched, move || c.fetch_add(1, Ordering::Relaxed) + 1);

        assert_eq!(future.wait().expect("value"), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn starts_with_no_threads() {
        let pool = ThreadPool::new(4);
        assert_eq!(pool.live_threads(), 0);
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn err_result_becomes_failure() {
        let sched = scheduler(ThreadPool::new(1));
        let future = sched
            .pool()
            .try_submit(&sched, || "x".parse::<i32>());
        let err = future.wait().expect_err("parse should fail");
        assert!(err.is_failed());
        let failure = future.failure().expect("failure recorded");
        assert!(failure.downcast_ref::<std::num::ParseIntError>().is_some());
    }

    #[test]
    fn panic_becomes_failure_and_worker_survives() {
        let sched = scheduler(ThreadPool::new(1));
        let failing = sched.async_call(|| -> i32 { panic!("intentional panic") });
        let err = failing.wait().expect_err("panic should fail the future");
        assert!(err.is_failed());
        assert!(err.to_string().contains("intentional panic"));

        let ok = sched.async_call(|| 5);
        assert_eq!(ok.wait().expect("worker still serving"), 5);
        assert_eq!(sched.pool().live_threads(), 1);
    }

    #[test]
    fn host_exit_cancels_and_terminates_worker() {
        let sched = scheduler(ThreadPool::new(1));
        let future = sched.async_call(|| -> i32 { crate::types::request_exit(2) });
        let err = future.wait().expect_err("host exit cancels");
        assert!(err.is_cancelled());

        for _ in 0..200 {
            if sched.pool().live_threads() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sched.pool().live_threads(), 0);

        // A fresh worker takes over.
        assert_eq!(sched.async_call(|| 9).wait().expect("value"), 9);
    }

    #[test]
    fn unwound_worker_releases_its_handle() {
        let sched = scheduler(ThreadPool::new(1));
        let future = sched.async_call(|| -> i32 { crate::types::request_exit(3) });
        assert!(future.wait().expect_err("host exit cancels").is_cancelled());

        for _ in 0..200 {
            if sched.pool().live_threads() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let threads = sched.pool().inner.threads.lock();
        assert_eq!(threads.live, 0);
        assert!(threads.handles.is_empty(), "dead worker handle kept");
    }

    #[test]
    fn pending_count_stays_bounded_under_fast_workers() {
        let sched = scheduler(ThreadPool::new(4));
        let futures: Vec<_> = (0..500u32)
            .map(|i| {
                let future = sched.async_call(move || i);
                assert!(sched.pool().pending_count() <= 500);
                future
            })
            .collect();
        for future in &futures {
            future.wait().expect("value");
        }
        assert_eq!(sched.pool().pending_count(), 0);
    }

    #[test]
    fn never_exceeds_max_threads() {
        let sched = scheduler(ThreadPool::new(4));
        let futures: Vec<_> = (0..100)
            .map(|i| {
                sched.async_call(move || {
                    thread::sleep(Duration::from_millis(1));
                    i
                })
            })
            .collect();

        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.wait().expect("value"), i);
        }
        let stats = sched.pool().stats();
        assert!(stats.peak <= 4, "peak {} exceeded cap", stats.peak);
        assert_eq!(stats.completed, 100);
    }

    #[test]
    fn reuses_idle_worker() {
        let sched = scheduler(ThreadPool::new(4));
        for i in 0..10 {
            assert_eq!(sched.async_call(move || i).wait().expect("value"), i);
        }
        assert_eq!(sched.pool().stats().peak, 1);
    }

    #[test]
    fn idle_workers_retire() {
        let options = ThreadPoolOptions {
            max_threads: 3,
            idle_timeout: Duration::from_millis(50),
            ..ThreadPoolOptions::default()
        };
        let sched = scheduler(ThreadPool::with_options(options));

        let barrier = Arc::new(std::sync::Barrier::new(4));
        let futures: Vec<_> = (0..3)
            .map(|_| {
                let b = Arc::clone(&barrier);
                sched.async_call(move || {
                    b.wait();
                })
            })
            .collect();
        barrier.wait();
        for f in &futures {
            f.wait().expect("done");
        }

        thread::sleep(Duration::from_millis(300));
        assert_eq!(sched.pool().live_threads(), 0);
    }

    #[test]
    fn shutdown_joins_and_is_idempotent() {
        let sched = scheduler(ThreadPool::new(2));
        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            let _ = sched.async_call(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }

        sched.pool().shutdown();
        assert!(sched.pool().is_shutdown());
        assert_eq!(sched.pool().live_threads(), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 10);

        sched.pool().shutdown();
        assert_eq!(sched.pool().live_threads(), 0);
    }

    #[test]
    fn submit_after_shutdown_is_cancelled() {
        let sched = scheduler(ThreadPool::new(1));
        sched.shutdown();
        let future = sched.async_call(|| 1);
        assert!(future.is_cancelled());
    }

    #[test]
    fn thread_callbacks() {
        let started = Arc::new(AtomicI32::new(0));
        let stopped = Arc::new(AtomicI32::new(0));
        let s = Arc::clone(&started);
        let t = Arc::clone(&stopped);

        let options = ThreadPoolOptions {
            max_threads: 2,
            on_thread_start: Some(Arc::new(move || {
                s.fetch_add(1, Ordering::Relaxed);
            })),
            on_thread_stop: Some(Arc::new(move || {
                t.fetch_add(1, Ordering::Relaxed);
            })),
            ..ThreadPoolOptions::default()
        };
        let sched = scheduler(ThreadPool::with_options(options));
        sched.async_call(|| ()).wait().expect("done");
        sched.shutdown();

        assert_eq!(started.load(Ordering::Relaxed), 1);
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn thread_names_use_prefix() {
        let options = ThreadPoolOptions {
            max_threads: 2,
            thread_name_prefix: "unique-pool".to_string(),
            ..ThreadPoolOptions::default()
        };
        let sched = scheduler(ThreadPool::with_options(options));

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let futures: Vec<_> = (0..2)
            .map(|_| {
                let b = Arc::clone(&barrier);
                sched.async_call(move || {
                    b.wait();
                    thread::current().name().unwrap_or_default().to_string()
                })
            })
            .collect();

        let names: HashSet<String> = futures
            .iter()
            .map(|f| f.wait().expect("name"))
            .collect();
        assert_eq!(names.len(), 2, "expected two distinct workers");
        assert!(names.iter().all(|n| n.starts_with("unique-pool-worker-")));
    }
}

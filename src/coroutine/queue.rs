//! Sequential execution of coroutines.
//!
//! A [`CoroutineQueue`] runs at most one coroutine at a time. Coroutines
//! submitted while another is running wait in a FIFO backlog, unstarted, and
//! the next one starts from the finished callback of the previous one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;

use super::{Coroutine, Routine};
use crate::future::Cancellable;
use crate::runtime::scheduler::SchedulerHandle;
use crate::types::FutureId;

struct Pending {
    handle: Box<dyn Cancellable>,
    start: Box<dyn FnOnce() + Send + 'static>,
}

#[derive(Default)]
struct QueueState {
    /// Weak handle to the coroutine currently running, if any.
    running: Option<Box<dyn Cancellable>>,
    backlog: VecDeque<Pending>,
}

impl QueueState {
    fn running_id(&self) -> Option<FutureId> {
        self.running.as_ref().map(|running| running.future_id())
    }
}

/// Runs coroutines one at a time, in submission order.
///
/// Every coroutine entering the queue gets a finished callback, so its
/// failure counts as handled.
pub struct CoroutineQueue {
    scheduler: SchedulerHandle,
    state: Arc<Mutex<QueueState>>,
}

impl CoroutineQueue {
    /// Creates an empty queue whose coroutines use `scheduler`.
    #[must_use]
    pub fn new(scheduler: &SchedulerHandle) -> Self {
        Self {
            scheduler: scheduler.clone(),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Wraps `routine` in a coroutine and queues it.
    ///
    /// The coroutine starts now if the queue is idle, otherwise once every
    /// coroutine queued before it has finished.
    pub fn run<T, R>(&self, routine: R) -> Coroutine<T>
    where
        T: Clone + Send + 'static,
        R: Routine<T>,
    {
        let coroutine = Coroutine::new(&self.scheduler, routine);
        self.enqueue(coroutine.clone());
        coroutine
    }

    /// Queues an existing, not yet started coroutine.
    ///
    /// A coroutine that is already terminal is not queued.
    pub fn enqueue<T>(&self, coroutine: Coroutine<T>)
    where
        T: Clone + Send + 'static,
    {
        let id = coroutine.id();
        let state = Arc::downgrade(&self.state);
        coroutine.on_finished(move |_| {
            if let Some(state) = state.upgrade() {
                advance(&state, id);
            }
        });

        let handle: Box<dyn Cancellable> = Box::new(coroutine.downgrade());
        {
            let mut state = self.state.lock();
            if coroutine.ready() {
                // Already terminal; there is nothing to run or wait for.
                tracing::trace!(future_id = %id, "terminal coroutine not queued");
                return;
            }
            if state.running.is_some() {
                state.backlog.push_back(Pending {
                    handle,
                    start: Box::new(move || coroutine.start()),
                });
                tracing::trace!(future_id = %id, backlog = state.backlog.len(), "coroutine queued");
                return;
            }
            state.running = Some(handle);
        }
        coroutine.start();
    }

    /// Drops the backlog and cancels the running coroutine.
    ///
    /// Backlog coroutines never start; they are cancelled so their holders
    /// observe a terminal state.
    pub fn cancel(&self) {
        let (running, backlog) = {
            let mut state = self.state.lock();
            (state.running.take(), mem::take(&mut state.backlog))
        };
        tracing::debug!(
            running = running.is_some(),
            backlog = backlog.len(),
            "cancelling coroutine queue"
        );
        for pending in backlog {
            pending.handle.cancel();
        }
        if let Some(running) = running {
            running.cancel();
        }
    }

    /// Number of coroutines in the queue, the running one included.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.backlog.len() + usize::from(state.running.is_some())
    }

    /// True if nothing is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.lock().running.is_none()
    }

    /// Same as [`is_idle`](Self::is_idle).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_idle()
    }
}

/// Starts the next backlog entry after `finished` completes.
///
/// A backlog entry that finishes before its turn (cancelled by its holder)
/// is removed instead. Entries found terminal when popped are skipped.
fn advance(state: &Mutex<QueueState>, finished: FutureId) {
    let mut discarded = Vec::new();
    let start = {
        let mut state = state.lock();
        if state.running_id() != Some(finished) {
            if let Some(pos) = state
                .backlog
                .iter()
                .position(|pending| pending.handle.future_id() == finished)
            {
                discarded.extend(state.backlog.remove(pos));
                tracing::trace!(future_id = %finished, "finished backlog entry removed");
            }
            None
        } else {
            state.running = None;
            let mut next_start = None;
            while let Some(next) = state.backlog.pop_front() {
                if next.handle.is_ready() {
                    discarded.push(next);
                    continue;
                }
                state.running = Some(next.handle);
                next_start = Some(next.start);
                break;
            }
            next_start
        }
    };
    drop(discarded);
    if let Some(start) = start {
        start();
    }
}

impl fmt::Debug for CoroutineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CoroutineQueue")
            .field("running", &state.running_id())
            .field("backlog", &state.backlog.len())
            .finish()
    }
}

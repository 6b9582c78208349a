//! Async Task Tracker
//!
//! Counts every outstanding timer, animation-frame request and network
//! operation of one window so callers can wait for the window to go quiet
//! ([`TaskTracker::when_complete`]) or tear all pending work down at once
//! ([`TaskTracker::cancel_all`]).
//!
//! The tracker never looks at what a task does. Adapters register a task
//! together with a cancel capability and deregister it when the work is done.
//! Everything runs on a single event-loop thread, so the state lives behind
//! `Rc<RefCell<_>>`. No borrow is held while a cancel capability or a waiter
//! runs, which keeps registration re-entrant.

use futures::channel::oneshot;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Task types
// ---------------------------------------------------------------------------

/// Task identifier. Ids are never reused within one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of platform primitive a task wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Timeout,
    Interval,
    AnimationFrame,
    NetworkFetch,
}

impl TaskKind {
    /// Timeouts and intervals share one id space for `clearTimeout`/`clearInterval`
    pub fn is_timer(self) -> bool {
        matches!(self, TaskKind::Timeout | TaskKind::Interval)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Timeout => write!(f, "Timeout"),
            TaskKind::Interval => write!(f, "Interval"),
            TaskKind::AnimationFrame => write!(f, "AnimationFrame"),
            TaskKind::NetworkFetch => write!(f, "NetworkFetch"),
        }
    }
}

/// Capability that stops the underlying primitive of a task
pub type CancelFn = Box<dyn FnOnce() -> Result<()>>;

struct PendingTask {
    kind: TaskKind,
    cancel: CancelFn,
}

/// Counters describing tracker activity since creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// Tasks ever registered
    pub registered: u64,
    /// Tasks removed by `deregister` (fired, resolved or failed)
    pub completed: u64,
    /// Tasks removed by an explicit cancel or a `cancel_all` sweep
    pub cancelled: u64,
    /// Cancel capabilities that reported an error
    pub cancel_failures: u64,
    /// Times the pending set drained to zero with waiters present
    pub drains: u64,
    /// `when_complete` futures settled
    pub waiters_resolved: u64,
}

#[derive(Default)]
struct TrackerState {
    tasks: HashMap<TaskId, PendingTask>,
    waiters: Vec<oneshot::Sender<()>>,
    next_id: u64,
    stats: TrackerStats,
}

impl TrackerState {
    fn alloc_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    /// Remove `id`; hand back the task and, if the set drained, the waiters to notify
    fn remove(&mut self, id: TaskId) -> Option<(PendingTask, Vec<oneshot::Sender<()>>)> {
        let task = self.tasks.remove(&id)?;
        let waiters = if self.tasks.is_empty() {
            std::mem::take(&mut self.waiters)
        } else {
            Vec::new()
        };
        if !waiters.is_empty() {
            self.stats.drains += 1;
            self.stats.waiters_resolved += waiters.len() as u64;
        }
        Some((task, waiters))
    }
}

fn notify(waiters: Vec<oneshot::Sender<()>>) {
    for waiter in waiters {
        // The caller may have dropped its future already.
        let _ = waiter.send(());
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Per-window registry of pending async work.
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone, Default)]
pub struct TaskTracker {
    state: Rc<RefCell<TrackerState>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending task with its cancel capability
    pub fn register<F>(&self, kind: TaskKind, cancel: F) -> TaskId
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.register_with(kind, move |_| Box::new(cancel) as CancelFn)
    }

    /// Register a pending task whose cancel capability depends on its own id.
    ///
    /// `build` runs without the registry borrowed, so it may schedule
    /// platform work or register further tasks.
    pub fn register_with<B>(&self, kind: TaskKind, build: B) -> TaskId
    where
        B: FnOnce(TaskId) -> CancelFn,
    {
        let id = self.state.borrow_mut().alloc_id();
        let cancel = build(id);
        let mut state = self.state.borrow_mut();
        state.tasks.insert(id, PendingTask { kind, cancel });
        state.stats.registered += 1;
        debug!(task = %id, kind = %kind, pending = state.tasks.len(), "task registered");
        id
    }

    /// Mark `id` as complete. Unknown or already removed ids are ignored.
    ///
    /// Returns whether the task was still pending.
    pub fn deregister(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = state.remove(id);
            if removed.is_some() {
                state.stats.completed += 1;
            }
            removed
        };
        match removed {
            Some((task, waiters)) => {
                trace!(task = %id, kind = %task.kind, "task completed");
                drop(task);
                if !waiters.is_empty() {
                    debug!(waiters = waiters.len(), "pending set drained");
                }
                notify(waiters);
                true
            }
            None => {
                trace!(task = %id, "deregister of unknown task ignored");
                false
            }
        }
    }

    /// Cancel one task: run its capability, then drop it from the registry
    pub fn cancel(&self, id: TaskId) -> bool {
        self.cancel_matching(id, |_| true)
    }

    /// Cancel `id` only if its kind satisfies `pred`
    pub fn cancel_matching<P>(&self, id: TaskId, pred: P) -> bool
    where
        P: FnOnce(TaskKind) -> bool,
    {
        // `pred` runs unborrowed and may look at the tracker itself.
        let Some(kind) = self.kind_of(id) else {
            return false;
        };
        if !pred(kind) {
            return false;
        }
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = state.remove(id);
            if removed.is_some() {
                state.stats.cancelled += 1;
            }
            removed
        };
        let Some((task, waiters)) = removed else {
            return false;
        };
        debug!(task = %id, kind = %task.kind, "task cancelled");
        if let Err(err) = (task.cancel)() {
            warn!(task = %id, kind = %task.kind, error = %err, "cancel capability failed");
            self.state.borrow_mut().stats.cancel_failures += 1;
        }
        notify(waiters);
        true
    }

    /// A future that settles once nothing is pending, or on the next `cancel_all`
    pub fn when_complete(&self) -> AsyncCompletion {
        let mut state = self.state.borrow_mut();
        if state.tasks.is_empty() {
            state.stats.waiters_resolved += 1;
            return AsyncCompletion { inner: None };
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        AsyncCompletion { inner: Some(rx) }
    }

    /// Cancel every pending task and settle every waiter.
    ///
    /// The registry is emptied before any capability runs, so a failing or
    /// panicking capability cannot leave tasks behind. Failures are logged
    /// and the sweep carries on.
    pub fn cancel_all(&self) {
        let (mut tasks, waiters) = {
            let mut state = self.state.borrow_mut();
            let tasks: Vec<(TaskId, PendingTask)> = state.tasks.drain().collect();
            let waiters = std::mem::take(&mut state.waiters);
            state.stats.cancelled += tasks.len() as u64;
            state.stats.waiters_resolved += waiters.len() as u64;
            (tasks, waiters)
        };
        tasks.sort_by_key(|(id, _)| *id);
        debug!(tasks = tasks.len(), waiters = waiters.len(), "cancelling all pending tasks");

        let mut failures = 0;
        for (id, task) in tasks {
            if let Err(err) = (task.cancel)() {
                warn!(task = %id, kind = %task.kind, error = %err, "cancel capability failed");
                failures += 1;
            }
        }
        if failures > 0 {
            self.state.borrow_mut().stats.cancel_failures += failures;
        }
        notify(waiters);
    }

    /// Number of tasks currently pending
    pub fn pending_count(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.state.borrow().tasks.contains_key(&id)
    }

    pub fn kind_of(&self, id: TaskId) -> Option<TaskKind> {
        self.state.borrow().tasks.get(&id).map(|t| t.kind)
    }

    /// Number of `when_complete` futures still waiting
    pub fn waiter_count(&self) -> usize {
        self.state.borrow().waiters.len()
    }

    /// Return a snapshot of tracker statistics
    pub fn stats(&self) -> TrackerStats {
        self.state.borrow().stats.clone()
    }

    /// Non-owning handle for platform callbacks
    pub fn downgrade(&self) -> WeakTaskTracker {
        WeakTaskTracker {
            state: Rc::downgrade(&self.state),
        }
    }
}

/// Weak counterpart of [`TaskTracker`].
///
/// Timer and frame callbacks hold this so the registry and the event loop
/// do not keep each other alive.
#[derive(Clone)]
pub struct WeakTaskTracker {
    state: Weak<RefCell<TrackerState>>,
}

impl WeakTaskTracker {
    pub fn upgrade(&self) -> Option<TaskTracker> {
        self.state.upgrade().map(|state| TaskTracker { state })
    }
}

impl fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TaskTracker")
            .field("pending", &state.tasks.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Completion future
// ---------------------------------------------------------------------------

/// Future returned by [`TaskTracker::when_complete`]
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct AsyncCompletion {
    inner: Option<oneshot::Receiver<()>>,
}

impl AsyncCompletion {
    /// Whether the future was already settled when it was created
    pub fn is_immediate(&self) -> bool {
        self.inner.is_none()
    }
}

impl Future for AsyncCompletion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.inner.as_mut() else {
            return Poll::Ready(());
        };
        // A dropped sender counts as settled: the tracker only drops waiters
        // while sweeping or draining.
        match Pin::new(rx).poll(cx) {
            Poll::Ready(_) => {
                self.inner = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Deregisters a task when dropped.
///
/// Used by adapters whose completion is "whenever the caller lets go",
/// such as a fetch response that is never read.
#[derive(Debug)]
pub struct TaskGuard {
    tracker: TaskTracker,
    id: TaskId,
}

impl TaskGuard {
    pub fn new(tracker: TaskTracker, id: TaskId) -> Self {
        Self { tracker, id }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.deregister(self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

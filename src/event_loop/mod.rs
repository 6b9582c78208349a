//! Event Loop Implementation
//!
//! Deterministic, virtual-time scheduler for one window. It owns the two
//! macrotask sources the window exposes, timers and animation frames, and
//! knows nothing about task tracking; adapters in [`crate::window`] bind
//! each entry to a tracked task.
//!
//! Callbacks are never invoked while the loop state is borrowed, so a
//! callback may schedule or clear timers freely.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

/// Handle of a requested animation frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

type TimerCallback = Rc<RefCell<Box<dyn FnMut()>>>;

/// Deadline of a timer whose delay runs past the end of the clock.
/// Such a timer stays queued but never comes due.
pub const NEVER: u64 = u64::MAX;
type FrameCallback = Box<dyn FnOnce(f64)>;

/// A timer waiting in the macrotask queue
struct Macrotask {
    id: TimerId,
    /// Tie-breaker so timers due at the same instant fire in scheduling order
    seq: u64,
    fire_at: u64,
    delay: u64,
    repeating: bool,
    callback: TimerCallback,
}

/// Result of driving a window until its event loop goes idle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Timer callbacks invoked
    pub timers_fired: usize,
    /// Animation-frame callbacks invoked
    pub frames_run: usize,
    /// Loop iterations (each = drain microtasks + one macrotask step)
    pub iterations: usize,
    /// Virtual time when the loop went idle
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    pub timers_scheduled: u64,
    pub timers_cleared: u64,
    pub timers_fired: u64,
    pub frames_requested: u64,
    pub frames_cancelled: u64,
    pub frames_run: u64,
    /// Microtask drains performed by the owning window
    pub microtask_turns: u64,
}

struct LoopState {
    virtual_time: u64,
    next_timer_id: u64,
    next_seq: u64,
    timers: Vec<Macrotask>,
    next_frame_id: u64,
    frames: Vec<(FrameId, FrameCallback)>,
    stats: EventLoopStats,
}

/// Shared handle onto a window's timer and animation-frame queues
#[derive(Clone)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventLoop {
    /// Create a new event loop whose clock starts at `start_time` ms
    pub fn new(start_time: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(LoopState {
                virtual_time: start_time,
                next_timer_id: 1,
                next_seq: 0,
                timers: Vec::new(),
                next_frame_id: 1,
                frames: Vec::new(),
                stats: EventLoopStats::default(),
            })),
        }
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.state.borrow().virtual_time
    }

    /// Move the clock forward to `time`. The clock never runs backwards.
    pub fn set_time(&self, time: u64) {
        let mut state = self.state.borrow_mut();
        if time > state.virtual_time {
            state.virtual_time = time;
        }
    }

    /// Schedule a timer (setTimeout/setInterval)
    pub fn schedule_timer<F>(&self, delay: u64, repeating: bool, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        // A zero-delay interval would be due again the moment it fired.
        let delay = if repeating { delay.max(1) } else { delay };
        let mut state = self.state.borrow_mut();
        let id = TimerId(state.next_timer_id);
        state.next_timer_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        let fire_at = state.virtual_time.saturating_add(delay);
        state.timers.push(Macrotask {
            id,
            seq,
            fire_at,
            delay,
            repeating,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        state.stats.timers_scheduled += 1;
        trace!(timer = %id, fire_at, repeating, "timer scheduled");
        id
    }

    /// Cancel a timer by ID. Unknown ids are ignored.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.timers.len();
        state.timers.retain(|t| t.id != id);
        let cleared = state.timers.len() != before;
        if cleared {
            state.stats.timers_cleared += 1;
            trace!(timer = %id, "timer cleared");
        }
        cleared
    }

    /// Check if there are pending timers
    pub fn has_pending_timers(&self) -> bool {
        !self.state.borrow().timers.is_empty()
    }

    pub fn pending_timer_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Get the time of the next timer that can still come due
    pub fn next_timer_time(&self) -> Option<u64> {
        self.state
            .borrow()
            .timers
            .iter()
            .map(|t| t.fire_at)
            .filter(|at| *at != NEVER)
            .min()
    }

    /// Fire the earliest timer that is due at the current time.
    ///
    /// Repeating timers are rescheduled before their callback runs, so the
    /// callback can clear its own interval. Returns whether a timer fired.
    pub fn fire_next_due(&self) -> bool {
        let callback = {
            let mut state = self.state.borrow_mut();
            let now = state.virtual_time;
            let next_idx = state
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.fire_at <= now && t.fire_at != NEVER)
                .min_by_key(|(_, t)| (t.fire_at, t.seq))
                .map(|(i, _)| i);
            let Some(idx) = next_idx else {
                return false;
            };
            let task = state.timers.remove(idx);
            if task.repeating {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.timers.push(Macrotask {
                    id: task.id,
                    seq,
                    fire_at: now.saturating_add(task.delay),
                    delay: task.delay,
                    repeating: true,
                    callback: task.callback.clone(),
                });
            }
            state.stats.timers_fired += 1;
            trace!(timer = %task.id, now, "timer fired");
            task.callback
        };

        match callback.try_borrow_mut() {
            Ok(mut cb) => {
                let cb: &mut dyn FnMut() = &mut **cb;
                cb()
            }
            Err(_) => warn!("interval callback re-entered while running; tick skipped"),
        }
        true
    }

    /// Queue a callback for the next animation frame
    pub fn request_frame<F>(&self, callback: F) -> FrameId
    where
        F: FnOnce(f64) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = FrameId(state.next_frame_id);
        state.next_frame_id += 1;
        state.frames.push((id, Box::new(callback)));
        state.stats.frames_requested += 1;
        id
    }

    /// Cancel a requested frame. Unknown ids are ignored.
    pub fn cancel_frame(&self, id: FrameId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.frames.len();
        state.frames.retain(|(fid, _)| *fid != id);
        let cancelled = state.frames.len() != before;
        if cancelled {
            state.stats.frames_cancelled += 1;
        }
        cancelled
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.state.borrow().frames.is_empty()
    }

    /// Snapshot the frames belonging to the frame about to run.
    ///
    /// Frames requested while these callbacks run land in the next frame.
    pub fn begin_frame(&self) -> Vec<FrameId> {
        self.state.borrow().frames.iter().map(|(id, _)| *id).collect()
    }

    /// Run one frame callback from the current batch, if still queued
    pub fn fire_frame(&self, id: FrameId) -> bool {
        let (callback, timestamp) = {
            let mut state = self.state.borrow_mut();
            let Some(idx) = state.frames.iter().position(|(fid, _)| *fid == id) else {
                return false;
            };
            let (_, callback) = state.frames.remove(idx);
            state.stats.frames_run += 1;
            (callback, state.virtual_time as f64)
        };
        callback(timestamp);
        true
    }

    pub(crate) fn note_microtask_turn(&self) {
        self.state.borrow_mut().stats.microtask_turns += 1;
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.state.borrow().stats.clone()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("virtual_time", &state.virtual_time)
            .field("timers", &state.timers.len())
            .field("frames", &state.frames.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

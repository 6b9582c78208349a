//! Window
//!
//! The window-equivalent object: timers, animation frames and `fetch`, each
//! bound to the window's [`TaskTracker`] through a thin adapter, plus the
//! deterministic drivers tests use to move the event loop along.
//!
//! Microtasks are futures on a single-threaded [`LocalPool`]. They are
//! drained after every macrotask, so promise-style continuations always run
//! before the next timer or frame callback.

mod fetch;

pub use fetch::{BodyRead, FetchFuture, FetchOptions, Response};

use fetch::PendingResponse;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, trace, warn};

use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, EventLoopStats, RunResult};
use crate::network::{HttpResponse, Network, ParsedUrl};
use crate::tracker::{AsyncCompletion, TaskGuard, TaskId, TaskKind, TaskTracker, TrackerStats};

struct WindowInner {
    config: WindowConfig,
    event_loop: EventLoop,
    tracker: TaskTracker,
    network: Rc<dyn Network>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

/// Emulated browser window.
///
/// Cloning yields another handle onto the same window. Each window owns its
/// own tracker and clock; windows never share pending work.
#[derive(Clone)]
pub struct Window {
    inner: Rc<WindowInner>,
}

impl Window {
    pub fn new(config: WindowConfig, network: Rc<dyn Network>) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            inner: Rc::new(WindowInner {
                event_loop: EventLoop::new(config.start_time_ms),
                tracker: TaskTracker::new(),
                config,
                network,
                pool: RefCell::new(pool),
                spawner,
            }),
        }
    }

    /// A window with the default configuration
    pub fn with_network(network: Rc<dyn Network>) -> Self {
        Self::new(WindowConfig::default(), network)
    }

    pub fn config(&self) -> &WindowConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Current virtual time in ms
    pub fn now(&self) -> u64 {
        self.inner.event_loop.current_time()
    }

    pub fn pending_async_count(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.inner.tracker.stats()
    }

    pub fn event_loop_stats(&self) -> EventLoopStats {
        self.inner.event_loop.stats()
    }

    // -----------------------------------------------------------------------
    // Async bookkeeping
    // -----------------------------------------------------------------------

    /// Settles once every timer, frame and fetch pending right now has finished
    pub fn when_async_complete(&self) -> AsyncCompletion {
        self.inner.tracker.when_complete()
    }

    /// Cancel every pending timer, frame and fetch of this window
    pub fn cancel_async(&self) {
        debug!(pending = self.pending_async_count(), "cancelling window async work");
        self.inner.tracker.cancel_all();
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn set_timeout<F>(&self, callback: F, delay_ms: u64) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let event_loop = self.inner.event_loop.clone();
        let tracker = self.inner.tracker.downgrade();
        self.inner.tracker.register_with(TaskKind::Timeout, move |id| {
            let mut callback = Some(callback);
            let timer = event_loop.schedule_timer(delay_ms, false, move || {
                // Deregister first; a timeout that is no longer tracked was cancelled.
                let live = tracker.upgrade().is_some_and(|t| t.deregister(id));
                if !live {
                    trace!(task = %id, "cancelled timeout skipped");
                    return;
                }
                if let Some(callback) = callback.take() {
                    callback();
                }
            });
            Box::new(move || {
                event_loop.clear_timer(timer);
                Ok(())
            })
        })
    }

    /// Clear a timeout or interval. Unknown ids and other task kinds are ignored.
    pub fn clear_timeout(&self, id: TaskId) -> bool {
        self.inner.tracker.cancel_matching(id, TaskKind::is_timer)
    }

    /// Repeat `callback` every `delay_ms` until cleared.
    ///
    /// The interval holds one tracker registration for its whole lifetime,
    /// so the window is not quiet while an interval is live.
    pub fn set_interval<F>(&self, mut callback: F, delay_ms: u64) -> TaskId
    where
        F: FnMut() + 'static,
    {
        let event_loop = self.inner.event_loop.clone();
        let tracker = self.inner.tracker.downgrade();
        self.inner.tracker.register_with(TaskKind::Interval, move |id| {
            let timer = event_loop.schedule_timer(delay_ms, true, move || {
                if tracker.upgrade().is_some_and(|t| t.is_pending(id)) {
                    callback();
                }
            });
            Box::new(move || {
                event_loop.clear_timer(timer);
                Ok(())
            })
        })
    }

    pub fn clear_interval(&self, id: TaskId) -> bool {
        self.inner.tracker.cancel_matching(id, TaskKind::is_timer)
    }

    // -----------------------------------------------------------------------
    // Animation frames
    // -----------------------------------------------------------------------

    pub fn request_animation_frame<F>(&self, callback: F) -> TaskId
    where
        F: FnOnce(f64) + 'static,
    {
        let event_loop = self.inner.event_loop.clone();
        let tracker = self.inner.tracker.downgrade();
        self.inner.tracker.register_with(TaskKind::AnimationFrame, move |id| {
            let frame = event_loop.request_frame(move |timestamp| {
                if tracker.upgrade().is_some_and(|t| t.deregister(id)) {
                    callback(timestamp);
                }
            });
            Box::new(move || {
                event_loop.cancel_frame(frame);
                Ok(())
            })
        })
    }

    pub fn cancel_animation_frame(&self, id: TaskId) -> bool {
        self.inner
            .tracker
            .cancel_matching(id, |kind| kind == TaskKind::AnimationFrame)
    }

    // -----------------------------------------------------------------------
    // Fetch
    // -----------------------------------------------------------------------

    /// Issue a request through the window's network primitive.
    ///
    /// An invalid URL rejects the returned future; the task is still
    /// registered and released like any other failed fetch. Cancelling the
    /// task drops the network future, which aborts the request.
    pub fn fetch(&self, url: &str, options: FetchOptions) -> FetchFuture {
        let abandoned = Rc::new(Cell::new(false));
        let pending: PendingResponse = Rc::new(RefCell::new(None));
        let (flag, slot) = (abandoned.clone(), pending.clone());
        let id = self.inner.tracker.register(TaskKind::NetworkFetch, move || {
            flag.set(true);
            if slot.take().is_some() {
                trace!("in-flight request aborted");
            }
            Ok(())
        });
        let guard = TaskGuard::new(self.inner.tracker.clone(), id);

        let response: LocalBoxFuture<'static, Result<HttpResponse>> = match ParsedUrl::parse(url) {
            Ok(_) => {
                let request = options.into_request(url, &self.inner.config.user_agent);
                debug!(task = %id, method = %request.method, url, "fetch issued");
                self.inner.network.issue(request)
            }
            Err(err) => {
                debug!(task = %id, url, error = %err, "fetch rejected");
                future::ready(Err(err)).boxed_local()
            }
        };
        *pending.borrow_mut() = Some(response);
        FetchFuture::new(pending, guard, abandoned)
    }

    // -----------------------------------------------------------------------
    // Microtasks
    // -----------------------------------------------------------------------

    /// Run `future` on the window's microtask queue
    pub fn spawn_local<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if let Err(err) = self.inner.spawner.spawn_local(future) {
            warn!(error = %err, "failed to queue microtask");
        }
    }

    pub fn queue_microtask<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.spawn_local(async move { callback() });
    }

    // -----------------------------------------------------------------------
    // Drivers
    // -----------------------------------------------------------------------

    /// Poll queued futures until none can make progress.
    ///
    /// Returns `false` when called from inside a running microtask, where a
    /// nested drain is skipped.
    pub fn run_pending_microtasks(&self) -> bool {
        let Ok(mut pool) = self.inner.pool.try_borrow_mut() else {
            trace!("microtask drain already in progress");
            return false;
        };
        pool.run_until_stalled();
        drop(pool);
        self.inner.event_loop.note_microtask_turn();
        true
    }

    /// Fire every timer due at the current time, draining microtasks after each
    pub fn run_pending_timers(&self) -> usize {
        self.run_pending_microtasks();
        let mut fired = 0;
        while self.inner.event_loop.fire_next_due() {
            fired += 1;
            self.run_pending_microtasks();
        }
        fired
    }

    /// Move the clock forward by `ms`, firing timers as they come due
    pub fn advance_time(&self, ms: u64) -> usize {
        let event_loop = &self.inner.event_loop;
        let target = event_loop.current_time().saturating_add(ms);
        let mut fired = self.run_pending_timers();
        while let Some(at) = event_loop.next_timer_time().filter(|at| *at <= target) {
            event_loop.set_time(at);
            fired += self.run_pending_timers();
        }
        event_loop.set_time(target);
        fired
    }

    /// Run the callbacks of one animation frame at the current time
    pub fn run_animation_frame(&self) -> usize {
        self.run_pending_microtasks();
        let event_loop = &self.inner.event_loop;
        let mut ran = 0;
        for id in event_loop.begin_frame() {
            if event_loop.fire_frame(id) {
                ran += 1;
                self.run_pending_microtasks();
            }
        }
        ran
    }

    /// Drive timers, frames and microtasks until the event loop has nothing
    /// left to run.
    ///
    /// Fetches waiting on the network are not loop work: the loop can be idle
    /// while the tracker still counts them. The same goes for timers whose
    /// delay runs past the end of the clock, which never come due.
    pub fn run_until_idle(&self) -> Result<RunResult> {
        let event_loop = &self.inner.event_loop;
        let limit = self.inner.config.max_run_iterations;
        let frame_interval = self.inner.config.frame_interval_ms.max(1);
        let mut result = RunResult::default();

        while result.iterations < limit {
            let fired = self.run_pending_timers();
            if fired > 0 {
                result.timers_fired += fired;
                result.iterations += 1;
                continue;
            }

            let next_timer = event_loop.next_timer_time();
            if event_loop.has_pending_frames() {
                let frame_at = event_loop.current_time().saturating_add(frame_interval);
                match next_timer {
                    Some(at) if at < frame_at => event_loop.set_time(at),
                    _ => {
                        event_loop.set_time(frame_at);
                        result.frames_run += self.run_animation_frame();
                    }
                }
            } else if let Some(at) = next_timer {
                event_loop.set_time(at);
            } else {
                result.final_time = event_loop.current_time();
                return Ok(result);
            }
            result.iterations += 1;
        }

        warn!(iterations = limit, "event loop did not go idle");
        Err(Error::RunLimit { iterations: limit })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Scripted window runs
//!
//! A scenario is a JSON description of timers, frames and fetches to start
//! on a fresh window, with an optional point in virtual time at which all
//! pending work is cancelled. Running it drives the window until idle and
//! reports what happened. This is what the `window-async run` command uses.
//!
//! ```text
//! {
//!   "timeouts": [10, 20],
//!   "intervals": [{ "delay_ms": 5, "ticks": 3 }],
//!   "frames": 2,
//!   "routes": [{ "url": "http://api.test/a", "body": { "ok": true } }],
//!   "fetches": [{ "url": "http://api.test/a" }],
//!   "cancel_at_ms": 12
//! }
//! ```

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

use crate::config::WindowConfig;
use crate::error::Result;
use crate::event_loop::{EventLoopStats, RunResult};
use crate::network::{HttpMethod, MockNetwork, MockResponse};
use crate::tracker::{TaskId, TrackerStats};
use crate::window::{FetchOptions, Window};

/// An interval that clears itself after `ticks` callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub delay_ms: u64,
    pub ticks: u32,
}

/// A mocked network route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
    /// Reject the request with this message instead of answering
    #[serde(default)]
    pub fail: Option<String>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub config: WindowConfig,
    pub timeouts: Vec<u64>,
    pub intervals: Vec<IntervalSpec>,
    pub frames: usize,
    pub routes: Vec<RouteSpec>,
    pub fetches: Vec<FetchSpec>,
    pub cancel_at_ms: Option<u64>,
}

/// Outcome of [`Scenario::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    /// Timer, interval-tick and frame callbacks that ran
    pub callbacks_run: u64,
    /// Fetches whose JSON body was read successfully
    pub fetches_ok: u64,
    /// Fetches that rejected or carried an unreadable body
    pub fetches_failed: u64,
    pub cancelled: bool,
    /// Whether the completion future taken at start had settled
    pub drained: bool,
    pub pending_after: usize,
    pub run: RunResult,
    pub tracker: TrackerStats,
    pub event_loop: EventLoopStats,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Start everything on a fresh window and drive it until idle
    pub fn run(&self) -> Result<ScenarioReport> {
        let network = Rc::new(MockNetwork::auto());
        for route in &self.routes {
            match &route.fail {
                Some(message) => network.route_failure(route.method, &route.url, message),
                None => network.route(
                    route.method,
                    &route.url,
                    MockResponse {
                        status: route.status,
                        ..MockResponse::json(&route.body)
                    },
                ),
            }
        }

        let window = Window::new(self.config.clone(), network);
        let callbacks = Rc::new(Cell::new(0u64));
        let fetches_ok = Rc::new(Cell::new(0u64));
        let fetches_failed = Rc::new(Cell::new(0u64));

        for &delay in &self.timeouts {
            let c = callbacks.clone();
            window.set_timeout(move || c.set(c.get() + 1), delay);
        }

        for spec in &self.intervals {
            let c = callbacks.clone();
            let w = window.clone();
            let slot: Rc<Cell<Option<TaskId>>> = Rc::new(Cell::new(None));
            let s = slot.clone();
            let remaining = Cell::new(spec.ticks);
            let id = window.set_interval(
                move || {
                    c.set(c.get() + 1);
                    let left = remaining.get().saturating_sub(1);
                    remaining.set(left);
                    if left == 0 {
                        if let Some(id) = s.get() {
                            w.clear_interval(id);
                        }
                    }
                },
                spec.delay_ms,
            );
            slot.set(Some(id));
        }

        for _ in 0..self.frames {
            let c = callbacks.clone();
            window.request_animation_frame(move |_| c.set(c.get() + 1));
        }

        for spec in &self.fetches {
            let (w, ok, failed) = (window.clone(), fetches_ok.clone(), fetches_failed.clone());
            let spec = spec.clone();
            window.spawn_local(async move {
                let options = FetchOptions::get().method(spec.method);
                let outcome = match w.fetch(&spec.url, options).await {
                    Ok(resp) => resp.json::<serde_json::Value>().await.map(|_| ()),
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(()) => ok.set(ok.get() + 1),
                    Err(err) => {
                        debug!(url = %spec.url, error = %err, "scenario fetch failed");
                        failed.set(failed.get() + 1);
                    }
                }
            });
        }

        let done = window.when_async_complete();
        info!(pending = window.pending_async_count(), "scenario started");

        let cancelled = match self.cancel_at_ms {
            Some(at) => {
                window.advance_time(at.saturating_sub(window.now()));
                window.cancel_async();
                true
            }
            None => false,
        };

        let run = window.run_until_idle()?;
        let report = ScenarioReport {
            callbacks_run: callbacks.get(),
            fetches_ok: fetches_ok.get(),
            fetches_failed: fetches_failed.get(),
            cancelled,
            drained: done.now_or_never().is_some(),
            pending_after: window.pending_async_count(),
            run,
            tracker: window.tracker_stats(),
            event_loop: window.event_loop_stats(),
        };
        info!(callbacks = report.callbacks_run, drained = report.drained, "scenario finished");
        Ok(report)
    }
}

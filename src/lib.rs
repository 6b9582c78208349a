//! window-async: pending-work tracking for an emulated browser window
//!
//! A [`Window`] exposes `setTimeout`, `setInterval`, `requestAnimationFrame`
//! and `fetch` style primitives on a deterministic, virtual-time event loop.
//! Every primitive registers with the window's [`TaskTracker`], which lets a
//! host either wait until the window has gone quiet or cancel everything the
//! window still has in flight.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use futures::FutureExt;
//! use window_async::{MockNetwork, Window};
//!
//! fn main() -> window_async::Result<()> {
//!     let window = Window::with_network(Rc::new(MockNetwork::auto()));
//!     window.set_timeout(|| println!("tick"), 10);
//!     let done = window.when_async_complete();
//!     window.run_until_idle()?;
//!     assert!(done.now_or_never().is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`tracker`] | Task registry, completion futures, cancel sweep |
//! | [`event_loop`] | Virtual clock, timer queue, animation frames |
//! | [`network`] | Request/response types, the [`Network`](network::Network) seam, [`MockNetwork`] |
//! | [`window`] | Platform adapters and loop drivers |
//! | [`config`] | [`WindowConfig`] |
//! | [`scenario`] | JSON-scripted runs used by the CLI |

pub mod config;
pub mod event_loop;
pub mod network;
pub mod prelude;
pub mod scenario;
pub mod tracker;
pub mod window;

mod error;

pub use config::WindowConfig;
pub use error::{Error, ErrorKind, Result};
pub use event_loop::{EventLoop, EventLoopStats, RunResult};
pub use network::{HttpMethod, MockNetwork, MockResponse, Network};
pub use scenario::{Scenario, ScenarioReport};
pub use tracker::{AsyncCompletion, TaskId, TaskKind, TaskTracker, TrackerStats};
pub use window::{FetchOptions, Response, Window};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

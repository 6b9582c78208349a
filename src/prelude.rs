//! Prelude module for convenient imports
//!
//! ```no_run
//! use window_async::prelude::*;
//! use std::rc::Rc;
//!
//! let window = Window::with_network(Rc::new(MockNetwork::new()));
//! window.request_animation_frame(|ts| println!("frame at {ts}"));
//! ```

// Window and adapters
pub use crate::window::{BodyRead, FetchFuture, FetchOptions, Response, Window};

// Tracking
pub use crate::tracker::{AsyncCompletion, TaskGuard, TaskId, TaskKind, TaskTracker};

// Network
pub use crate::network::{HttpMethod, HttpRequest, HttpResponse, MockNetwork, MockResponse, Network};

// Configuration and errors
pub use crate::config::WindowConfig;
pub use crate::error::{Error, ErrorKind, Result};

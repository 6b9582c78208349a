//! Window configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Configuration for a [`Window`](crate::Window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Virtual clock value (ms) when the window is created.
    pub start_time_ms: u64,
    /// Spacing of animation frames when the loop runs until idle.
    pub frame_interval_ms: u64,
    /// Upper bound on loop iterations in `run_until_idle` (starvation protection).
    pub max_run_iterations: usize,
    /// Sent as `User-Agent` on every fetch that does not set its own.
    pub user_agent: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start_time_ms: 0,
            frame_interval_ms: 16,
            max_run_iterations: 10_000,
            user_agent: format!("window-async/{}", crate::VERSION),
        }
    }
}

impl WindowConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 {
            return Err(Error::config("frame_interval_ms must be greater than 0"));
        }
        if self.max_run_iterations == 0 {
            return Err(Error::config("max_run_iterations must be greater than 0"));
        }
        Ok(())
    }
}

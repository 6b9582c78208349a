//! Error types for the window-async runtime

use std::fmt;
use thiserror::Error;

use crate::tracker::TaskKind;

/// Main error type for window-async
#[derive(Error, Debug)]
pub enum Error {
    /// The network primitive rejected a request
    #[error("NetworkError: {message} ({url})")]
    Network { url: String, message: String },

    /// A fetch URL could not be parsed
    #[error("TypeError: invalid URL: {0}")]
    InvalidUrl(String),

    /// An in-flight request was dropped before a response arrived
    #[error("AbortError: request to {url} was aborted")]
    Aborted { url: String },

    /// Response body was not valid JSON
    #[error("SyntaxError: {0}")]
    Json(#[from] serde_json::Error),

    /// Response body could not be decoded
    #[error("TypeError: {0}")]
    Body(String),

    /// A task's cancel capability failed during a sweep
    #[error("CancelError: {kind}: {message}")]
    Cancel { kind: TaskKind, message: String },

    /// Invalid window configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// `run_until_idle` gave up before the loop went idle
    #[error("RunLimitError: event loop still busy after {iterations} iterations")]
    RunLimit { iterations: usize },
}

/// Coarse classification used by callers that only care about the family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Body,
    Cancel,
    Config,
    Io,
    RunLimit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "Network"),
            ErrorKind::Body => write!(f, "Body"),
            ErrorKind::Cancel => write!(f, "Cancel"),
            ErrorKind::Config => write!(f, "Config"),
            ErrorKind::Io => write!(f, "Io"),
            ErrorKind::RunLimit => write!(f, "RunLimit"),
        }
    }
}

impl Error {
    /// Create a network failure for `url`
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an abort error for `url`
    pub fn aborted(url: impl Into<String>) -> Self {
        Error::Aborted { url: url.into() }
    }

    /// Create a cancel failure for a task of `kind`
    pub fn cancel(kind: TaskKind, message: impl Into<String>) -> Self {
        Error::Cancel {
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// The family this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } | Error::InvalidUrl(_) | Error::Aborted { .. } => {
                ErrorKind::Network
            }
            Error::Json(_) | Error::Body(_) => ErrorKind::Body,
            Error::Cancel { .. } => ErrorKind::Cancel,
            Error::Config(_) => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
            Error::RunLimit { .. } => ErrorKind::RunLimit,
        }
    }
}

/// Result type alias for window-async
pub type Result<T> = std::result::Result<T, Error>;

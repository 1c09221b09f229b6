use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type RequestResult<T> = Result<T, RequestError>;

/// Failure of a single REST exchange.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response. `message` is extracted from the body when possible.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("invalid JSON response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }

    /// Short text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            RequestError::Timeout(_) => "The request timed out.".to_string(),
            RequestError::Cancelled => "The request was cancelled.".to_string(),
            RequestError::Transport(_) => "Could not reach the server.".to_string(),
            RequestError::Status { message, .. } => message.clone(),
            RequestError::Decode(_) => "The server sent an unreadable response.".to_string(),
        }
    }
}

/// Failure opening or reading the event stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("stream endpoint answered HTTP {status}")]
    Status { status: u16 },

    #[error("malformed event stream: {0}")]
    Protocol(String),

    #[error("stream closed by server")]
    Closed,
}

/// The panel task is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("panel runtime has stopped")]
pub struct RuntimeStopped;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid base URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("Config validation error: {0}")]
    Validation(String),

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

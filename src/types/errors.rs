//! Error types for calcache.

use std::time::Duration;

use thiserror::Error;

/// Default result type for calcache.
pub type CalcacheResult<T> = Result<T, CalcacheError>;

/// Top-level errors.
#[derive(Error, Debug)]
pub enum CalcacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl CalcacheError {
    /// Creates a generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Creates a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Wire protocol violations. Always local to one connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("connection closed mid-frame ({pending} bytes buffered)")]
    Truncated { pending: usize },

    #[error("unexpected frame: {0}")]
    Unexpected(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single expression evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The expression could not be parsed or evaluated.
    #[error("malformed expression: {0}")]
    Malformed(String),

    /// The computation server did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The computation server could not be reached or answered garbage.
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),
}

impl EvalError {
    /// Whether a stale cached value may be served instead of this error.
    pub fn allows_stale(&self) -> bool {
        matches!(self, EvalError::Timeout(_) | EvalError::ServerUnavailable(_))
    }
}

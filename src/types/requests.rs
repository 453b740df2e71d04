//! Request types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Expression evaluation request.
///
/// The same shape travels client -> proxy and proxy -> server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    /// Correlation id, unique for the lifetime of one connection.
    pub id: u64,

    /// Arithmetic expression as typed by the user.
    pub expression: String,

    /// Whether the explanation steps should be included in the response.
    #[serde(default = "default_true")]
    pub show_steps: bool,

    /// Oldest cached answer (in seconds) the client is willing to accept.
    /// `Some(0)` forces a revalidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,

    /// Relay the answer but keep it out of the cache.
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_store: bool,
}

impl Request {
    /// Creates a new request with default options.
    pub fn new(id: u64, expression: impl Into<String>) -> Self {
        Self {
            id,
            expression: expression.into(),
            show_steps: true,
            max_age_secs: None,
            no_store: false,
        }
    }

    /// Sets whether steps are returned.
    pub fn with_steps(mut self, show_steps: bool) -> Self {
        self.show_steps = show_steps;
        self
    }

    /// Sets the client max-age.
    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    /// Marks the request as not cacheable.
    pub fn without_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    /// Client max-age as a duration.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

//! Response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::EvalError;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Where the value in a response came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServedFrom {
    /// Cached entry inside its freshness window.
    FreshCache,
    /// Cached entry past its window, served because upstream failed.
    StaleCache,
    /// Computed by the server for this request.
    Computed,
}

impl std::fmt::Display for ServedFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServedFrom::FreshCache => write!(f, "fresh-cache"),
            ServedFrom::StaleCache => write!(f, "stale-cache"),
            ServedFrom::Computed => write!(f, "computed"),
        }
    }
}

/// Error kinds visible on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MalformedExpression,
    Timeout,
    Unavailable,
    ConnectionError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MalformedExpression => write!(f, "malformed-expression"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Unavailable => write!(f, "unavailable"),
            ErrorKind::ConnectionError => write!(f, "connection-error"),
        }
    }
}

impl From<&EvalError> for ErrorKind {
    fn from(err: &EvalError) -> Self {
        match err {
            EvalError::Malformed(_) => ErrorKind::MalformedExpression,
            EvalError::Timeout(_) => ErrorKind::Timeout,
            EvalError::ServerUnavailable(_) => ErrorKind::Unavailable,
        }
    }
}

/// A computed value with its explanation, as produced by the computation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Numeric result.
    pub value: f64,

    /// Ordered explanation steps.
    pub steps: Vec<String>,

    /// Freshness cap the server attached to this answer.
    pub max_age: Option<Duration>,

    /// Server asked that this answer is not cached.
    pub no_store: bool,
}

impl Evaluation {
    /// Creates a cacheable evaluation without a server max-age.
    pub fn new(value: f64, steps: Vec<String>) -> Self {
        Self {
            value,
            steps,
            max_age: None,
            no_store: false,
        }
    }

    /// Sets the server max-age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Marks the evaluation as not cacheable.
    pub fn without_store(mut self) -> Self {
        self.no_store = true;
        self
    }
}

/// Successful response frame body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalResponse {
    /// Id of the request being answered.
    pub id: u64,

    /// Numeric result.
    pub value: f64,

    /// Explanation steps (empty when the client asked for none).
    #[serde(default)]
    pub steps: Vec<String>,

    /// Origin of the value.
    pub served_from: ServedFrom,

    /// Freshness cap for downstream caches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,

    /// Downstream caches must not store this answer.
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_store: bool,
}

impl EvalResponse {
    /// Builds a response from an evaluation.
    pub fn from_evaluation(id: u64, evaluation: Evaluation, served_from: ServedFrom) -> Self {
        Self {
            id,
            value: evaluation.value,
            steps: evaluation.steps,
            served_from,
            max_age_secs: evaluation.max_age.map(|d| d.as_secs()),
            no_store: evaluation.no_store,
        }
    }

    /// Converts back into an evaluation (used on the proxy's upstream side).
    pub fn into_evaluation(self) -> Evaluation {
        Evaluation {
            value: self.value,
            steps: self.steps,
            max_age: self.max_age_secs.map(Duration::from_secs),
            no_store: self.no_store,
        }
    }
}

/// Error response frame body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Id of the request being answered (0 when unknown).
    pub id: u64,

    /// Error category.
    pub kind: ErrorKind,

    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            message: message.into(),
        }
    }

    /// Maps an evaluation failure onto the wire.
    pub fn from_eval_error(id: u64, err: &EvalError) -> Self {
        Self::new(id, err.into(), err.to_string())
    }

    /// Interprets an error received from the computation server.
    pub fn into_eval_error(self) -> EvalError {
        match self.kind {
            ErrorKind::MalformedExpression => EvalError::Malformed(self.message),
            ErrorKind::Timeout | ErrorKind::Unavailable | ErrorKind::ConnectionError => {
                EvalError::ServerUnavailable(format!("{}: {}", self.kind, self.message))
            }
        }
    }
}

/// Any response to a [`Request`](super::requests::Request).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(EvalResponse),
    Error(ErrorResponse),
}

impl Response {
    /// Id of the request being answered.
    pub fn id(&self) -> u64 {
        match self {
            Response::Result(r) => r.id,
            Response::Error(e) => e.id,
        }
    }

    /// Checks whether the response is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_served_from_wire_names() {
        assert_eq!(
            serde_json::to_string(&ServedFrom::FreshCache).unwrap(),
            "\"fresh-cache\""
        );
        assert_eq!(
            serde_json::to_string(&ServedFrom::StaleCache).unwrap(),
            "\"stale-cache\""
        );
        assert_eq!(ServedFrom::Computed.to_string(), "computed");
    }

    #[test]
    fn test_error_kind_wire_names() {
        let kind: ErrorKind = serde_json::from_str("\"malformed-expression\"").unwrap();
        assert_eq!(kind, ErrorKind::MalformedExpression);
        assert_eq!(
            serde_json::to_string(&ErrorKind::ConnectionError).unwrap(),
            "\"connection-error\""
        );
    }

    #[test]
    fn test_eval_error_mapping() {
        let err = EvalError::Timeout(Duration::from_secs(2));
        let response = ErrorResponse::from_eval_error(9, &err);

        assert_eq!(response.id, 9);
        assert_eq!(response.kind, ErrorKind::Timeout);

        let back = ErrorResponse::new(1, ErrorKind::MalformedExpression, "1+").into_eval_error();
        assert_eq!(back, EvalError::Malformed("1+".to_string()));

        let unavailable = ErrorResponse::new(1, ErrorKind::Unavailable, "down").into_eval_error();
        assert!(unavailable.allows_stale());
    }

    #[test]
    fn test_evaluation_survives_response() {
        let evaluation = Evaluation::new(12.0, vec!["1+2 = 3".into(), "3*4 = 12".into()])
            .with_max_age(Duration::from_secs(30));
        let response = EvalResponse::from_evaluation(4, evaluation.clone(), ServedFrom::Computed);

        assert_eq!(response.max_age_secs, Some(30));
        assert_eq!(response.into_evaluation(), evaluation);
    }
}

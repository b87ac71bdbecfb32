use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// One failed attempt at decoding private key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttempt {
    pub format: &'static str,
    pub reason: String,
}

/// Every decoding attempt, in the order they were tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttempts(pub Vec<KeyAttempt>);

impl fmt::Display for KeyAttempts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|a| format!("{}: {}", a.format, a.reason))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported private key format ({0})")]
    UnsupportedKeyFormat(KeyAttempts),

    #[error("network error: {0}")]
    Network(String),

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("scheduler query failed: {0}")]
    Query(String),

    #[error("cancel failed: {0}")]
    Cancel(String),

    #[error("malformed result artifact: {0}")]
    Parse(String),

    #[error("{operation} timed out after {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("remote file operation on {path} failed: {message}")]
    RemoteFs { path: String, message: String },

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Stable machine-readable error kind, reported at the HTTP boundary
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Auth(_) | Error::UnsupportedKeyFormat(_) => "auth",
            Error::Network(_) => "network",
            Error::Staging(_) | Error::RemoteFs { .. } => "staging",
            Error::Submission(_) => "submission",
            Error::Query(_) => "query",
            Error::Cancel(_) => "cancel",
            Error::Parse(_) => "parse",
            Error::Timeout { .. } => "timeout",
            Error::UnsupportedModel(_) => "unsupported_model",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Errors caused by the caller rather than the remote host
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::UnsupportedModel(_) | Error::InvalidRequest(_))
    }

    /// Filesystem failures become staging failures, transport failures keep their kind
    pub(crate) fn into_staging(self) -> Error {
        match self {
            Error::RemoteFs { path, message } => Error::Staging(format!("{path}: {message}")),
            other => other,
        }
    }

    /// Filesystem failures while inspecting a job become query failures
    pub(crate) fn into_query(self) -> Error {
        match self {
            Error::RemoteFs { path, message } => Error::Query(format!("{path}: {message}")),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

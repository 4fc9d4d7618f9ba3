//! Common error types for PrefSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for PrefSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A durable tier rejected a write because of its size limit.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A stored blob could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The remote tier could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote tier did not answer within the configured bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The remote tier rejected the session credentials.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Classify this error for structured reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::Storage(_) | Error::Io(_) => ErrorKind::Storage,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Whether a later attempt may succeed without any change on our side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::Parse(err.to_string())
        } else {
            Error::Serialization(err.to_string())
        }
    }
}

/// Serializable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    Parse,
    Network,
    Timeout,
    Unauthenticated,
    Storage,
    Serialization,
    InvalidInput,
    NotFound,
}

impl ErrorKind {
    /// The snake_case reason string used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Parse => "parse",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Storage => "storage",
            ErrorKind::Serialization => "serialization",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

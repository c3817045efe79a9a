//! Error types for the metrics tracking and A/B testing engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::abtest::TestStatus;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or test parameters. Surfaced immediately, never retried.
    #[error("Validation error: field '{field}': {message}")]
    Validation { field: String, message: String },

    /// A snapshot already exists for this url at the same timestamp
    #[error("Duplicate timestamp for '{url}' at {timestamp}")]
    DuplicateTimestamp {
        url: String,
        timestamp: DateTime<Utc>,
    },

    /// Relative change is undefined against a zero baseline
    #[error("Insufficient baseline for '{metric_name}': old value is zero")]
    InsufficientBaseline { metric_name: String },

    /// Persistence failure. Fatal to the current run, safe to retry on the next one.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid A/B test lifecycle transition
    #[error("Invalid state transition: {from} -> {to}")]
    StateTransition { from: TestStatus, to: TestStatus },

    /// Alert channel failure after bounded retries. Never aborts the metrics pipeline.
    #[error("Delivery error on {channel}: {message}")]
    Delivery { channel: String, message: String },

    /// Rollback requested with no pending backup
    #[error("No backup recorded for test '{0}'")]
    NoBackup(String),

    /// Unknown A/B test id
    #[error("Test not found: {0}")]
    TestNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for a validation failure naming the offending field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

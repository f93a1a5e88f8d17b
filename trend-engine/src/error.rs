//! Error types for the trend engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for trend engine operations.
pub type TrendResult<T> = Result<T, TrendError>;

/// Errors that can occur while configuring or running trend analysis.
///
/// Insufficient data and numerically degenerate windows are not errors: they
/// are reported through [`crate::analyzer::AnalysisStatus`] and logs so that
/// callers degrade gracefully.
#[derive(Error, Debug)]
pub enum TrendError {
    /// Malformed or out-of-range configuration parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The query range is empty, inverted, or would produce too many buckets.
    #[error("Invalid range: start {start} must be before end {end}{detail}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        detail: String,
    },

    /// Bucket width must be strictly positive.
    #[error("Invalid bucket width: {seconds}s (must be > 0)")]
    InvalidWidth { seconds: i64 },

    /// An observation or score triple violated its value constraints.
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    /// The observation source failed to produce data.
    #[error("Observation source error: {0}")]
    Source(String),

    /// The alert sink failed to accept alerts.
    #[error("Alert sink error: {0}")]
    Sink(String),

    /// Filesystem error (config files, JSON Lines sinks).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background detection task panicked or was cancelled.
    #[error("Detection task failed: {0}")]
    Task(String),
}

impl TrendError {
    /// Creates an invalid configuration error with the given message.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates an invalid observation error with the given message.
    pub fn invalid_observation(msg: impl Into<String>) -> Self {
        Self::InvalidObservation(msg.into())
    }

    /// Creates an invalid range error without extra detail.
    pub fn invalid_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::InvalidRange {
            start,
            end,
            detail: String::new(),
        }
    }

    /// Creates a source error with the given message.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Creates a sink error with the given message.
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Returns true if the error was caused by caller-supplied configuration
    /// and will not go away on retry.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::InvalidRange { .. } | Self::InvalidWidth { .. }
        )
    }
}

impl From<serde_json::Error> for TrendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TrendError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl From<toml::de::Error> for TrendError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig(format!("failed to parse TOML: {err}"))
    }
}

impl From<toml::ser::Error> for TrendError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

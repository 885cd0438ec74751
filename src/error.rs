// src/error.rs

//! Unified error handling for the archiver.
//!
//! The fetch/persist taxonomy (`Transient`, `MalformedResponse`, `Fatal`,
//! `RetriesExhausted`, `PartialWrite`, `DeadlineExceeded`) lives next to the
//! ambient I/O and configuration errors so every failure aborts a run through
//! the same `Result` alias.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for archiver operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection, timeout or 5xx failure; worth another attempt
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Response arrived but could not be mapped to a record
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Unexpected status or protocol error
    #[error("Fatal response error: {message}")]
    Fatal {
        status: Option<u16>,
        message: String,
    },

    /// Backoff budget consumed without a successful fetch
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// First store written, second failed
    #[error("Partial write for record {id}: {completed} written, {pending} failed: {source}")]
    PartialWrite {
        id: u64,
        completed: String,
        pending: String,
        source: Box<AppError>,
    },

    /// Overall run deadline hit
    #[error("Run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Shutdown requested by signal
    #[error("Run cancelled")]
    Cancelled,

    /// Another run holds the archive lock
    #[error("Archive is locked by another run: {0}")]
    Locked(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a transient (retryable) error.
    pub fn transient(message: impl fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    /// Create a malformed-response error.
    pub fn malformed(message: impl fmt::Display) -> Self {
        Self::MalformedResponse(message.to_string())
    }

    /// Create a fatal error, optionally carrying the HTTP status.
    pub fn fatal(status: Option<u16>, message: impl fmt::Display) -> Self {
        Self::Fatal {
            status,
            message: message.to_string(),
        }
    }

    /// Wrap the failure of the second store write.
    pub fn partial_write(
        id: u64,
        completed: impl Into<String>,
        pending: impl Into<String>,
        source: AppError,
    ) -> Self {
        Self::PartialWrite {
            id,
            completed: completed.into(),
            pending: pending.into(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the retry policy may attempt the fetch again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine-friendly name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Fatal { .. } => "fatal",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PartialWrite { .. } => "partial_write",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Locked(_) => "locked",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
            Self::Url(_) => "url",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
        }
    }
}

// src/error.rs

//! Unified error handling for the collector.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for remote fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Persisted dataset could not be parsed or breaks key integrity
    #[error("Corrupt store at {path}: {message}")]
    CorruptStore { path: String, message: String },

    /// Remote fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a corrupt store error for the given file.
    pub fn corrupt_store(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::CorruptStore {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
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
}

/// Errors surfaced by the fetch client after its own retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network failure, 5xx or secondary rate limit that outlived the retry budget
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { message: String, attempts: u32 },

    /// Primary quota exhausted and the pause until reset was interrupted
    #[error("rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// The requested resource does not exist upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// The credential was rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Payload did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// Cancelled before a response was received
    #[error("cancelled")]
    Cancelled,
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" (resets at {})", at.to_rfc3339()),
        None => String::new(),
    }
}

impl FetchError {
    /// Create a transient error.
    pub fn transient(message: impl fmt::Display, attempts: u32) -> Self {
        Self::Transient {
            message: message.to_string(),
            attempts,
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }

    /// Credential failures abort the run instead of failing one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

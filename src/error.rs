//! Custom error types for e2e-triage.
//!
//! Only a handful of things can actually fail: loading the pattern
//! database, loading configuration, and adding a pattern at runtime.
//! Extraction, fingerprinting and aggregation are total and never return
//! these errors.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for e2e-triage operations
#[derive(Error, Debug)]
pub enum TriageError {
    // =========================================================================
    // Pattern Database Errors
    // =========================================================================
    /// The pattern database could not be read or parsed
    #[error("Pattern database error: {message}")]
    PatternDatabase {
        message: String,
        path: Option<PathBuf>,
    },

    /// A pattern with the same id is already registered
    #[error("Duplicate pattern id: {id}")]
    DuplicatePattern { id: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Missing required file
    #[error("Missing required file: {path}")]
    MissingFile { path: PathBuf },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a pattern database error
    pub fn pattern_database(message: impl Into<String>) -> Self {
        Self::PatternDatabase {
            message: message.into(),
            path: None,
        }
    }

    /// Create a pattern database error with the offending path
    pub fn pattern_database_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::PatternDatabase {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PatternDatabase { .. } | Self::DuplicatePattern { .. } => 3,
            Self::MissingFile { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for e2e-triage results
pub type Result<T> = std::result::Result<T, TriageError>;

/// Extension trait for converting foreign errors to TriageError
pub trait IntoTriageError<T> {
    fn into_triage_config(self) -> Result<T>;
    fn into_triage_patterns(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoTriageError<T> for std::result::Result<T, E> {
    fn into_triage_config(self) -> Result<T> {
        self.map_err(|e| TriageError::config(e.into().to_string()))
    }

    fn into_triage_patterns(self) -> Result<T> {
        self.map_err(|e| TriageError::pattern_database(e.into().to_string()))
    }
}

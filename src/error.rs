//! Error types for Solidafy CDC
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// Remediation appended to every invalid-checkpoint failure
pub const CHECKPOINT_REMEDIATION: &str = "Please reset the connection, and then increase log \
     retention and/or increase sync frequency to prevent this from happening in the future.";

/// The main error type for Solidafy CDC
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Checkpoint Errors
    // ============================================================================
    #[error(
        "Saved offset {saved} is before replication slot's confirmed position {confirmed}. {}",
        CHECKPOINT_REMEDIATION
    )]
    RetentionViolation { saved: String, confirmed: String },

    #[error("Invalid log position '{value}': {message}")]
    InvalidLogPosition { value: String, message: String },

    #[error("Invalid position marker '{value}'")]
    InvalidMarker { value: String },

    // ============================================================================
    // Collaborator Errors
    // ============================================================================
    #[error("{phase} failed{}: {message}", .table.as_ref().map(|t| format!(" for table {t}")).unwrap_or_default())]
    Transient {
        phase: String,
        table: Option<String>,
        message: String,
    },

    // ============================================================================
    // Defects
    // ============================================================================
    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a transient collaborator error
    pub fn transient(
        phase: impl Into<String>,
        table: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transient {
            phase: phase.into(),
            table,
            message: message.into(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Io(_))
    }

    /// Check if this error requires the user to change configuration or state
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::MissingConfigField { .. }
                | Error::InvalidConfigValue { .. }
                | Error::RetentionViolation { .. }
        )
    }
}

/// Result type alias for Solidafy CDC
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap a collaborator failure as a transient error for a phase and table
    fn in_phase(self, phase: &str, table: Option<&dyn std::fmt::Display>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn in_phase(self, phase: &str, table: Option<&dyn std::fmt::Display>) -> Result<T> {
        self.map_err(|e| match e.into() {
            // Already classified; don't bury it under another layer
            err @ (Error::Transient { .. }
            | Error::InvariantViolation { .. }
            | Error::Config { .. }
            | Error::RetentionViolation { .. }) => err,
            err => Error::transient(phase, table.map(ToString::to_string), err.to_string()),
        })
    }
}

//! Custom error types for qreport.
//!
//! This module provides the crate-level error type. Component errors
//! ([`GatewayError`], [`RemoteError`]) are wrapped so that the CLI can map
//! every failure to an exit code and an operator-facing remediation hint.
//!
//! Parse problems inside a source file are *not* errors: they are collected as
//! [`crate::sources::ParseWarning`] values and counted in the aggregate.

use std::path::PathBuf;
use thiserror::Error;

use crate::llm::GatewayError;
use crate::sources::remote::RemoteError;

/// Main error type for qreport operations
#[derive(Error, Debug)]
pub enum QualityError {
    // =========================================================================
    // Input Errors
    // =========================================================================
    /// A required input file or directory is absent.
    #[error("Missing required input: {path}")]
    MissingInput { path: PathBuf, remediation: String },

    /// An input was present but unusable (not a parse warning: the whole input).
    #[error("Invalid input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

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

    // =========================================================================
    // External Services
    // =========================================================================
    /// The LLM gateway call failed.
    #[error("LLM gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The remote reports API failed.
    #[error("Remote reports API error: {0}")]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Output Errors
    // =========================================================================
    /// Refused to overwrite an existing artifact.
    #[error("Artifact already exists: {path}")]
    ArtifactExists { path: PathBuf },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QualityError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a missing-input error with a remediation hint
    pub fn missing_input(path: impl Into<PathBuf>, remediation: impl Into<String>) -> Self {
        Self::MissingInput {
            path: path.into(),
            remediation: remediation.into(),
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

    /// Operator-facing hint for fixing the failure, if one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::MissingInput { remediation, .. } => Some(remediation.clone()),
            Self::Config { path: Some(path), .. } => {
                Some(format!("Fix or remove the configuration file {}", path.display()))
            }
            Self::InvalidConfig { field, .. } => {
                Some(format!("Check the `{field}` setting (run `qreport config validate`)"))
            }
            Self::Gateway(err) => Some(err.remediation()),
            Self::Remote(err) => Some(err.remediation()),
            Self::ArtifactExists { .. } => Some(
                "Re-run with `--on-conflict version` to keep both reports side by side".to_string(),
            ),
            _ => None,
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingInput { .. } | Self::InvalidInput { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::Gateway(_) => 8,
            Self::Remote(_) => 9,
            Self::ArtifactExists { .. } => 10,
            _ => 1,
        }
    }
}

/// Type alias for qreport results
pub type Result<T> = std::result::Result<T, QualityError>;

/// Extension trait for converting foreign errors into [`QualityError`]
pub trait IntoQualityError<T> {
    fn into_config_error(self, path: &std::path::Path) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoQualityError<T> for std::result::Result<T, E> {
    fn into_config_error(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| QualityError::config_with_path(e.into().to_string(), path.to_path_buf()))
    }
}

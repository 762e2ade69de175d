//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Field does not exist in the settings document.
    #[error("unknown configuration field")]
    UnknownField {
        /// Name of the unexpected field.
        field: String,
    },
    /// The settings document could not be decoded.
    #[error("failed to parse settings document")]
    Parse {
        /// Source file when parsing from disk.
        path: Option<PathBuf>,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Reading or writing the settings file failed.
    #[error("settings io failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

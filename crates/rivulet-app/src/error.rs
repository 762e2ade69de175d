//! # Design
//!
//! - Centralize errors raised while booting and stopping the daemon.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Loading the settings document failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        #[source]
        source: rivulet_config::ConfigError,
    },
    /// Installing the logger failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        #[source]
        source: rivulet_telemetry::TelemetryError,
    },
    /// Starting the streaming service failed.
    #[error("service operation failed")]
    Service {
        /// Operation identifier.
        operation: &'static str,
        /// Source service error.
        #[source]
        source: rivulet_service::ServiceError,
    },
    /// Waiting for the shutdown signal failed.
    #[error("signal handling failed")]
    Signal {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: rivulet_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: rivulet_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn service(
        operation: &'static str,
        source: rivulet_service::ServiceError,
    ) -> Self {
        Self::Service { operation, source }
    }
}

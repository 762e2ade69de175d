//! Daemon boot sequence.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rivulet_config::Settings;
use rivulet_service::Service;
use rivulet_telemetry::{LogFormat, LoggingConfig, log_format_from_str};
use rivulet_torrent_mem::MemoryEngine;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};

/// Environment variable naming the settings document.
pub const SETTINGS_ENV: &str = "RIVULET_SETTINGS";
/// Environment variable selecting `json` or `pretty` log output.
pub const LOG_FORMAT_ENV: &str = "RIVULET_LOG_FORMAT";
/// Settings document used when [`SETTINGS_ENV`] is unset.
pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

/// Dependencies required to boot the daemon.
pub(crate) struct BootstrapDependencies {
    settings: Settings,
    log_format: LogFormat,
}

impl BootstrapDependencies {
    /// Resolve the settings document and log format from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let path = settings_path(std::env::var(SETTINGS_ENV).ok());
        let settings =
            Settings::load(path).map_err(|err| AppError::config("settings.load", err))?;
        let log_format = log_format_from_str(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
        Ok(Self {
            settings,
            log_format,
        })
    }
}

/// Entry point for the daemon boot sequence.
///
/// # Errors
///
/// Returns an error if the settings cannot be loaded, logging cannot be installed, the
/// service fails to start, or the shutdown signal cannot be awaited.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    rivulet_telemetry::init_logging(&LoggingConfig {
        level: &dependencies.settings.log_level,
        format: dependencies.log_format,
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    info!(
        settings = %dependencies.settings.path.display(),
        download_path = %dependencies.settings.download_path.display(),
        "rivulet bootstrap starting"
    );
    let service = start_service(dependencies.settings).await?;
    let outcome = serve_until(&service, tokio::signal::ctrl_c()).await;
    service.close().await;
    if let Err(err) = &outcome {
        error!(error = %err, "daemon stopped abnormally");
    }
    outcome
}

/// Start the streaming service on the in-process engine.
pub(crate) async fn start_service(settings: Settings) -> AppResult<Service> {
    let engine = Arc::new(MemoryEngine::new());
    Service::builder(settings, engine)
        .start()
        .await
        .map_err(|err| AppError::service("service.start", err))
}

/// Log domain events until `shutdown` resolves.
pub(crate) async fn serve_until(
    service: &Service,
    shutdown: impl Future<Output = io::Result<()>>,
) -> AppResult<()> {
    let mut events = service.events().subscribe(None);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.map_err(|source| AppError::Signal {
                    operation: "signal.ctrl_c",
                    source,
                })?;
                info!("shutdown requested");
                return Ok(());
            }
            Some(envelope) = events.next() => {
                debug!(id = envelope.id, kind = envelope.event.kind(), "domain event");
            }
        }
    }
}

fn settings_path(configured: Option<String>) -> PathBuf {
    configured
        .filter(|value| !value.trim().is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH), PathBuf::from)
}

//! Shared state handed to torrents, files and readers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rivulet_config::{EncryptionPolicy, Settings};
use rivulet_events::EventBus;
use rivulet_torrent_core::{
    EncryptionMode, Engine, InfoHash, SessionSettings, TorrentHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::space::SpaceProbe;

/// Session-wide collaborators.
pub(crate) struct SessionContext {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) settings: Settings,
    pub(crate) closing: CancellationToken,
    pub(crate) events: EventBus,
    pub(crate) space: Arc<dyn SpaceProbe>,
    applied: Mutex<SessionSettings>,
}

impl SessionContext {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        settings: Settings,
        events: EventBus,
        space: Arc<dyn SpaceProbe>,
    ) -> Self {
        let applied = session_settings(&settings);
        Self {
            engine,
            settings,
            closing: CancellationToken::new(),
            events,
            space,
            applied: Mutex::new(applied),
        }
    }

    /// Push the settings derived at construction to the engine.
    pub(crate) fn configure(&self) -> ServiceResult<()> {
        info!("applying session settings");
        let applied = self.lock_applied().clone();
        self.engine
            .apply_settings(&applied)
            .map_err(|err| ServiceError::engine("engine.apply_settings", err))
    }

    /// Switch the post-buffering rate caps on or off. No-op unless the caps are configured
    /// to apply only after buffering.
    pub(crate) fn set_buffering_rate_limit(&self, enable: bool) {
        if !self.settings.limit_after_buffering {
            return;
        }
        let download = self.settings.max_download_rate;
        let upload = self.settings.max_upload_rate;
        self.update(|applied| {
            if enable {
                if download > 0 {
                    info!(kib_per_sec = download / 1024, "buffer filled, rate limiting download");
                    applied.download_rate_limit = download;
                }
                if upload > 0 {
                    info!(kib_per_sec = upload / 1024, "buffer filled, rate limiting upload");
                    applied.upload_rate_limit = upload;
                }
            } else {
                info!("resetting rate limiting");
                applied.download_rate_limit = 0;
                applied.upload_rate_limit = 0;
            }
        });
    }

    /// Switch every discovery service off ahead of shutdown.
    pub(crate) fn stop_services(&self) {
        info!(
            dht = self.settings.disable_dht,
            upnp = self.settings.disable_upnp,
            "stopping discovery services"
        );
        self.update(|applied| *applied = applied.without_discovery());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    fn update(&self, change: impl FnOnce(&mut SessionSettings)) {
        let applied = {
            let mut guard = self.lock_applied();
            change(&mut guard);
            guard.clone()
        };
        if let Err(err) = self.engine.apply_settings(&applied) {
            warn!(error = %err, "failed to apply session settings");
        }
    }

    fn lock_applied(&self) -> std::sync::MutexGuard<'_, SessionSettings> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engine settings for the daemon configuration. Rate caps are left off when they only
/// apply after buffering.
pub(crate) fn session_settings(settings: &Settings) -> SessionSettings {
    let mut session = SessionSettings {
        user_agent: settings.user_agent.clone(),
        listen_port: settings.listen_port,
        listen_interfaces: settings.listen_interfaces.replace(' ', ""),
        outgoing_interfaces: settings.outgoing_interfaces.replace(' ', ""),
        connections_limit: settings.connections_limit,
        encryption: match settings.encryption_policy {
            EncryptionPolicy::Enabled => EncryptionMode::Enabled,
            EncryptionPolicy::Disabled => EncryptionMode::Disabled,
            EncryptionPolicy::Forced => EncryptionMode::Forced,
        },
        enable_dht: !settings.disable_dht,
        enable_lsd: !settings.disable_lsd,
        enable_upnp: !settings.disable_upnp,
        enable_natpmp: !settings.disable_upnp,
        ..SessionSettings::default()
    };
    if !settings.limit_after_buffering {
        if settings.max_download_rate > 0 {
            info!(
                kib_per_sec = settings.max_download_rate / 1024,
                "rate limiting download"
            );
            session.download_rate_limit = settings.max_download_rate;
        }
        if settings.max_upload_rate > 0 {
            info!(
                kib_per_sec = settings.max_upload_rate / 1024,
                "rate limiting upload"
            );
            session.upload_rate_limit = settings.max_upload_rate;
        }
    }
    session
}

/// Per-torrent collaborators shared with its files and readers.
pub(crate) struct TorrentContext {
    pub(crate) info_hash: InfoHash,
    pub(crate) handle: Arc<dyn TorrentHandle>,
    pub(crate) closing: CancellationToken,
    pub(crate) session: Arc<SessionContext>,
    paused: AtomicBool,
}

impl TorrentContext {
    pub(crate) fn new(
        handle: Arc<dyn TorrentHandle>,
        session: Arc<SessionContext>,
        paused: bool,
    ) -> Self {
        Self {
            info_hash: handle.info_hash(),
            handle,
            closing: CancellationToken::new(),
            session,
            paused: AtomicBool::new(paused),
        }
    }

    /// Explicit pause flag, set by the user or by a seeding policy.
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

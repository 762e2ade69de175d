//! In-process [`Engine`] implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rivulet_torrent_core::{
    AddTorrentParams, Alert, AlertCategory, AlertKind, Engine, EngineError, EngineResult,
    InfoHash, NativeState, SessionSettings, TorrentHandle, TorrentSource,
};
use tracing::{debug, info};

use crate::alerts::AlertQueue;
use crate::handle::{HandleSeed, MemoryHandle};
use crate::magnet;
use crate::metainfo;
use crate::resume::ResumeBlob;

/// Engine session keeping every torrent in process memory.
#[derive(Default)]
pub struct MemoryEngine {
    torrents: Mutex<HashMap<InfoHash, Arc<MemoryHandle>>>,
    alerts: Arc<AlertQueue>,
    settings: Mutex<SessionSettings>,
    paused: AtomicBool,
    shut_down: AtomicBool,
}

impl MemoryEngine {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle of an admitted torrent, for driving it from tests.
    #[must_use]
    pub fn handle(&self, info_hash: &InfoHash) -> Option<Arc<MemoryHandle>> {
        self.lock_torrents().get(info_hash).cloned()
    }

    /// Settings last applied to the session.
    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue an arbitrary alert.
    pub fn push_alert(&self, alert: Alert) {
        self.alerts.push(alert);
    }

    /// Whether [`Engine::shutdown`] ran.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn lock_torrents(&self) -> MutexGuard<'_, HashMap<InfoHash, Arc<MemoryHandle>>> {
        self.torrents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn seed_from(params: &AddTorrentParams) -> EngineResult<HandleSeed> {
        let mut seed = HandleSeed {
            info_hash: params.info_hash,
            name: params.name.clone().unwrap_or_default(),
            save_path: params.save_path.clone(),
            magnet: None,
            info: None,
            file_priorities: params.file_priorities.clone(),
            default_priority: params.default_file_priority,
            paused: params.paused,
            auto_managed: params.auto_managed,
        };
        match &params.source {
            TorrentSource::Magnet { uri } => seed.magnet = Some(uri.clone()),
            TorrentSource::Metainfo { bytes } => {
                let info = metainfo::decode(bytes)?.info;
                if info.info_hash()? != params.info_hash {
                    return Err(EngineError::InvalidMetainfo {
                        reason: "info hash does not match admission parameters".into(),
                    });
                }
                seed.info = Some(info);
            }
            TorrentSource::Resume { bytes } => {
                let blob = ResumeBlob::decode(bytes)?;
                seed.magnet = blob.magnet;
                seed.info = blob.info;
                if seed.save_path.as_os_str().is_empty() {
                    seed.save_path = PathBuf::from(blob.save_path);
                }
            }
        }
        Ok(seed)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn parse_magnet(&self, uri: &str) -> EngineResult<AddTorrentParams> {
        let link = magnet::parse(uri)?;
        let mut params = AddTorrentParams::new(
            link.info_hash,
            TorrentSource::Magnet {
                uri: uri.to_string(),
            },
        );
        params.name = link.display_name;
        Ok(params)
    }

    fn parse_metainfo(&self, bytes: &[u8]) -> EngineResult<AddTorrentParams> {
        let info = metainfo::decode(bytes)?.info;
        info.metadata()?;
        let mut params = AddTorrentParams::new(
            info.info_hash()?,
            TorrentSource::Metainfo {
                bytes: bytes.to_vec(),
            },
        );
        params.name = Some(info.name);
        Ok(params)
    }

    fn read_resume_data(&self, bytes: &[u8]) -> EngineResult<AddTorrentParams> {
        let blob = ResumeBlob::decode(bytes)?;
        let mut params = AddTorrentParams::new(
            blob.info_hash()?,
            TorrentSource::Resume {
                bytes: bytes.to_vec(),
            },
        );
        params.file_priorities = blob.file_priorities();
        params.paused = blob.paused != 0;
        params.auto_managed = blob.auto_managed != 0;
        params.save_path = PathBuf::from(&blob.save_path);
        params.name = Some(blob.name);
        Ok(params)
    }

    fn add_torrent(&self, params: AddTorrentParams) -> EngineResult<Arc<dyn TorrentHandle>> {
        let seed = Self::seed_from(&params)?;
        let has_metadata = seed.info.is_some();
        let handle = {
            let mut torrents = self.lock_torrents();
            if torrents.contains_key(&params.info_hash) {
                return Err(EngineError::DuplicateHandle {
                    info_hash: params.info_hash,
                });
            }
            let handle = MemoryHandle::new(seed, Arc::clone(&self.alerts))?;
            torrents.insert(params.info_hash, Arc::clone(&handle));
            handle
        };
        info!(info_hash = %params.info_hash, has_metadata, "torrent admitted");
        self.alerts.push(Alert::new(
            AlertCategory::STATUS,
            AlertKind::Other {
                what: "add_torrent".into(),
            },
            format!("added torrent {}", params.info_hash),
        ));
        if has_metadata && !params.paused {
            handle.set_state(NativeState::Downloading);
        }
        Ok(handle)
    }

    fn remove_torrent(&self, info_hash: &InfoHash, delete_files: bool) -> EngineResult<()> {
        let handle = self
            .lock_torrents()
            .remove(info_hash)
            .ok_or(EngineError::InvalidHandle {
                info_hash: *info_hash,
            })?;
        handle.invalidate();
        debug!(info_hash = %info_hash, delete_files, "torrent released");
        self.alerts.push(Alert::new(
            AlertCategory::STATUS,
            AlertKind::Other {
                what: "torrent_removed".into(),
            },
            format!("removed torrent {info_hash}"),
        ));
        Ok(())
    }

    fn generate_metainfo(&self, info_hash: &InfoHash) -> EngineResult<Vec<u8>> {
        let handle = self.handle(info_hash).ok_or(EngineError::InvalidHandle {
            info_hash: *info_hash,
        })?;
        let info = handle.info().ok_or(EngineError::MissingMetadata {
            info_hash: *info_hash,
        })?;
        metainfo::encode(&info)
    }

    fn apply_settings(&self, settings: &SessionSettings) -> EngineResult<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        debug!(
            download_rate_limit = settings.download_rate_limit,
            upload_rate_limit = settings.upload_rate_limit,
            enable_dht = settings.enable_dht,
            "session settings applied"
        );
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn wait_for_alerts(&self, max_wait: Duration) -> Vec<Alert> {
        self.alerts.wait(max_wait).await
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, handle) in self.lock_torrents().drain() {
            handle.invalidate();
        }
        info!("in-process engine shut down");
    }
}

//! Torrent registry and service lifecycle.
//!
//! Admission, removal and restore all go through the registry lock, and sidecar files are
//! only written while the torrent is registered.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rivulet_config::Settings;
use rivulet_events::{Event, EventBus};
use rivulet_torrent_core::{AddTorrentParams, Engine, EngineError, InfoHash, Priority};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::SessionContext;
use crate::error::{ServiceError, ServiceResult};
use crate::persist::{self, FASTRESUME_EXT, MAGNET_EXT, Persistence, TORRENT_EXT};
use crate::space::{FsSpaceProbe, SpaceProbe};
use crate::tasks;
use crate::torrent::Torrent;

/// Aggregate figures computed by the progress monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    /// Weighted completion percentage of the incomplete torrents; 100 when none are.
    pub progress: f64,
    /// Bytes per second across active torrents.
    pub download_rate: u64,
    /// Bytes per second across active torrents.
    pub upload_rate: u64,
    /// Torrents in the active set.
    pub num_torrents: usize,
    /// Whether the whole session is paused.
    pub is_paused: bool,
}

/// Torrent set plus the aggregates last computed over it.
pub(crate) struct Registry {
    pub(crate) torrents: Vec<Arc<Torrent>>,
    pub(crate) progress: f64,
    pub(crate) download_rate: u64,
    pub(crate) upload_rate: u64,
}

impl Registry {
    pub(crate) fn find(&self, info_hash: &InfoHash) -> Option<&Arc<Torrent>> {
        self.torrents
            .iter()
            .find(|torrent| torrent.info_hash() == *info_hash)
    }
}

/// State shared between the service and its background tasks.
pub(crate) struct ServiceState {
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) persist: Persistence,
}

impl ServiceState {
    pub(crate) async fn find(&self, info_hash: &InfoHash) -> Option<Arc<Torrent>> {
        self.registry.read().await.find(info_hash).cloned()
    }

    /// Admit a torrent. The duplicate check, the insert and the `sidecar` write happen
    /// under one write lock.
    async fn add(
        &self,
        mut params: AddTorrentParams,
        start: bool,
        sidecar: impl FnOnce(&Persistence, &InfoHash),
    ) -> ServiceResult<InfoHash> {
        let info_hash = params.info_hash;
        params.save_path.clone_from(&self.ctx.settings.download_path);
        if !start {
            params.file_priorities.clear();
            params.default_file_priority = Priority::DontDownload;
        }

        let mut registry = self.registry.write().await;
        if registry.find(&info_hash).is_some() {
            return Err(ServiceError::Duplicate { info_hash });
        }
        let handle = self.ctx.engine.add_torrent(params).map_err(|err| match err {
            EngineError::DuplicateHandle { info_hash } => ServiceError::Duplicate { info_hash },
            source => ServiceError::LoadTorrent {
                operation: "engine.add_torrent",
                source,
            },
        })?;
        let torrent = Arc::new(Torrent::new(handle, Arc::clone(&self.ctx)));
        torrent.populate_files();
        let name = torrent.info().name;
        registry.torrents.push(torrent);
        sidecar(&self.persist, &info_hash);
        drop(registry);

        info!(info_hash = %info_hash, name = %name, start, "torrent added");
        self.ctx.events.publish(Event::TorrentAdded {
            info_hash: info_hash.to_hex(),
            name,
        });
        Ok(info_hash)
    }

    async fn add_magnet(&self, uri: &str, start: bool) -> ServiceResult<InfoHash> {
        let params = self
            .ctx
            .engine
            .parse_magnet(uri)
            .map_err(|source| ServiceError::LoadTorrent {
                operation: "engine.parse_magnet",
                source,
            })?;
        self.add(params, start, |persist, info_hash| persist.save_magnet(info_hash, uri))
            .await
    }

    async fn add_torrent_data(&self, bytes: &[u8], start: bool) -> ServiceResult<InfoHash> {
        let params = self.parse_metainfo(bytes)?;
        self.add(params, start, |persist, info_hash| persist.save_torrent(info_hash, bytes))
            .await
    }

    async fn add_torrent_file(&self, path: &Path, start: bool) -> ServiceResult<InfoHash> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ServiceError::io("add_torrent_file.read", path, err))?;
        let params = self.parse_metainfo(&bytes)?;
        self.add(params, start, |persist, info_hash| {
            if !same_file(path, &persist.sidecar_path(info_hash, TORRENT_EXT)) {
                persist.save_torrent(info_hash, &bytes);
            }
        })
        .await
    }

    /// Re-admit a torrent from its resume blob. The blob is already durable and the torrent
    /// keeps the priorities it had.
    async fn add_torrent_with_resume_data(&self, path: &Path) -> ServiceResult<InfoHash> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ServiceError::io("add_resume_data.read", path, err))?;
        let params = self
            .ctx
            .engine
            .read_resume_data(&bytes)
            .map_err(|source| ServiceError::LoadTorrent {
                operation: "engine.read_resume_data",
                source,
            })?;
        self.add(params, true, |_, _| {}).await
    }

    fn parse_metainfo(&self, bytes: &[u8]) -> ServiceResult<AddTorrentParams> {
        self.ctx
            .engine
            .parse_metainfo(bytes)
            .map_err(|source| ServiceError::LoadTorrent {
                operation: "engine.parse_metainfo",
                source,
            })
    }

    /// Bring back every persisted torrent: resume blobs first, then `.torrent` files, then
    /// pending magnets. Unloadable sidecars are deleted and stale parts files swept.
    async fn restore(&self) {
        for path in self.persist.list(FASTRESUME_EXT) {
            match self.add_torrent_with_resume_data(&path).await {
                Ok(info_hash) => info!(info_hash = %info_hash, "restored from resume data"),
                Err(ServiceError::Duplicate { .. }) => {}
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "discarding unreadable resume data");
                    persist::remove_file(&path);
                }
            }
        }

        for path in self.persist.list(TORRENT_EXT) {
            match self.add_torrent_file(&path, false).await {
                Ok(info_hash) => info!(info_hash = %info_hash, "restored from torrent file"),
                Err(ServiceError::Duplicate { .. }) => {}
                Err(err @ ServiceError::LoadTorrent { .. }) => {
                    warn!(error = %err, path = %path.display(), "discarding unloadable torrent file");
                    if let Some(info_hash) = persist::sidecar_hash(&path) {
                        persist::remove_file(&self.persist.parts_path(&info_hash));
                        persist::remove_file(&self.persist.sidecar_path(&info_hash, FASTRESUME_EXT));
                    }
                    persist::remove_file(&path);
                }
                Err(err) => warn!(error = %err, path = %path.display(), "failed to restore torrent file"),
            }
        }

        for path in self.persist.list(MAGNET_EXT) {
            let uri = match tokio::fs::read_to_string(&path).await {
                Ok(uri) => uri,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to read magnet sidecar");
                    continue;
                }
            };
            match self.add_magnet(uri.trim(), false).await {
                Ok(info_hash) => info!(info_hash = %info_hash, "restored from magnet"),
                Err(ServiceError::Duplicate { .. }) => {}
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "discarding unloadable magnet");
                    persist::remove_file(&path);
                }
            }
        }

        let active: HashSet<InfoHash> = self
            .registry
            .read()
            .await
            .torrents
            .iter()
            .map(|torrent| torrent.info_hash())
            .collect();
        for orphan in self.persist.orphaned_parts(&active) {
            info!(path = %orphan.display(), "removing orphaned parts file");
            persist::remove_file(&orphan);
        }
    }
}

/// Builder for [`Service`].
pub struct ServiceBuilder {
    settings: Settings,
    engine: Arc<dyn Engine>,
    events: Option<EventBus>,
    space: Option<Arc<dyn SpaceProbe>>,
}

impl ServiceBuilder {
    /// Publish domain events on `events` instead of a private bus.
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Use `probe` for the free space check instead of the filesystem.
    #[must_use]
    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = Some(probe);
        self
    }

    /// Create the directories, configure the engine, restore persisted torrents and start
    /// the background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created or the engine rejects the
    /// session settings.
    pub async fn start(self) -> ServiceResult<Service> {
        for dir in [&self.settings.download_path, &self.settings.torrents_path] {
            fs::create_dir_all(dir).map_err(|err| ServiceError::io("service.create_dir", dir, err))?;
        }
        let persist = Persistence::new(&self.settings.torrents_path, &self.settings.download_path);
        let ctx = Arc::new(SessionContext::new(
            self.engine,
            self.settings,
            self.events.unwrap_or_default(),
            self.space.unwrap_or_else(|| Arc::new(FsSpaceProbe)),
        ));
        ctx.configure()?;

        let state = Arc::new(ServiceState {
            ctx,
            registry: RwLock::new(Registry {
                torrents: Vec::new(),
                progress: 100.0,
                download_rate: 0,
                upload_rate: 0,
            }),
            persist,
        });
        state.restore().await;

        let tasks = tasks::spawn_all(&state);
        info!(torrents = state.registry.read().await.torrents.len(), "service started");
        Ok(Service {
            state,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }
}

/// Owns the active torrents, the engine session and the background tasks.
pub struct Service {
    state: Arc<ServiceState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Service {
    /// Start building a service around `engine`.
    #[must_use]
    pub fn builder(settings: Settings, engine: Arc<dyn Engine>) -> ServiceBuilder {
        ServiceBuilder {
            settings,
            engine,
            events: None,
            space: None,
        }
    }

    /// Add a torrent from a magnet URI and persist a `.magnet` sidecar. Without `start` no
    /// file is fetched until its priority is raised.
    ///
    /// # Errors
    ///
    /// Returns a duplicate error when the torrent is already active and a load error when
    /// the URI is rejected.
    pub async fn add_magnet(&self, uri: &str, start: bool) -> ServiceResult<InfoHash> {
        self.state.add_magnet(uri, start).await
    }

    /// Add a torrent from `.torrent` bytes and persist them.
    ///
    /// # Errors
    ///
    /// Returns a duplicate error when the torrent is already active and a load error when
    /// the metainfo is rejected.
    pub async fn add_torrent_data(&self, bytes: &[u8], start: bool) -> ServiceResult<InfoHash> {
        self.state.add_torrent_data(bytes, start).await
    }

    /// Add a torrent from a `.torrent` file and copy it next to the other sidecars.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the file cannot be read, plus the errors of
    /// [`Service::add_torrent_data`].
    pub async fn add_torrent_file(&self, path: &Path, start: bool) -> ServiceResult<InfoHash> {
        self.state.add_torrent_file(path, start).await
    }

    /// Remove a torrent: its sidecars go, pending reads fail with a torrent-closed error and
    /// the engine drops it, optionally deleting the payload.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown info hash.
    pub async fn remove_torrent(&self, info_hash: &InfoHash, delete_files: bool) -> ServiceResult<()> {
        let mut registry = self.state.registry.write().await;
        let index = registry
            .torrents
            .iter()
            .position(|torrent| torrent.info_hash() == *info_hash)
            .ok_or(ServiceError::NotFound {
                info_hash: *info_hash,
            })?;
        self.state.persist.delete_all(info_hash);
        let torrent = registry.torrents.remove(index);
        torrent.close();
        if let Err(err) = self.state.ctx.engine.remove_torrent(info_hash, delete_files) {
            warn!(error = %err, info_hash = %info_hash, "engine failed to drop torrent");
        }
        drop(registry);

        info!(info_hash = %info_hash, delete_files, "torrent removed");
        self.state.ctx.events.publish(Event::TorrentRemoved {
            info_hash: info_hash.to_hex(),
            deleted_files: delete_files,
        });
        Ok(())
    }

    /// Active torrent by info hash.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown info hash.
    pub async fn get_torrent(&self, info_hash: &InfoHash) -> ServiceResult<Arc<Torrent>> {
        self.state
            .find(info_hash)
            .await
            .ok_or(ServiceError::NotFound {
                info_hash: *info_hash,
            })
    }

    /// Snapshot of the active torrents.
    pub async fn torrents(&self) -> Vec<Arc<Torrent>> {
        self.state.registry.read().await.torrents.clone()
    }

    /// Suspend every transfer.
    pub fn pause(&self) {
        self.state.ctx.engine.pause();
        info!("session paused");
        self.state.ctx.events.publish(Event::SessionPaused);
    }

    /// Resume transfers after [`Service::pause`].
    pub fn resume(&self) {
        self.state.ctx.engine.resume();
        info!("session resumed");
        self.state.ctx.events.publish(Event::SessionResumed);
    }

    /// Whether the session is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.ctx.engine.is_paused()
    }

    /// Figures from the last progress monitor tick.
    pub async fn status(&self) -> ServiceStatus {
        let registry = self.state.registry.read().await;
        ServiceStatus {
            progress: registry.progress,
            download_rate: registry.download_rate,
            upload_rate: registry.upload_rate,
            num_torrents: registry.torrents.len(),
            is_paused: self.is_paused(),
        }
    }

    /// Bus the service publishes domain events on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.state.ctx.events
    }

    /// Settings the service runs with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.state.ctx.settings
    }

    /// Stop discovery, stop the background tasks and wait for them, fail pending reads and
    /// release the engine session. Later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping service");
        self.state.ctx.stop_services();
        self.state.ctx.closing.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        for torrent in self.state.registry.read().await.torrents.iter() {
            torrent.close();
        }
        self.state.ctx.engine.shutdown();
        info!("service stopped");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.state.ctx.closing.cancel();
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

//! Torrent wrapper: lazy file list, pause state, snapshots and the one-time free space check.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rivulet_events::{Event, PauseReason};
use rivulet_torrent_core::{InfoHash, Priority, TorrentHandle};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::{SessionContext, TorrentContext};
use crate::error::{ServiceError, ServiceResult};
use crate::file::{TorrentFile, derived_state};
use crate::state::TorrentState;

/// Identity of a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TorrentInfo {
    /// Info hash.
    pub info_hash: InfoHash,
    /// Name from the metadata, else the name the torrent was added with, else the hash.
    pub name: String,
    /// Payload size; 0 before metadata.
    pub size: u64,
}

/// Point-in-time transfer figures for a torrent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct TorrentStatus {
    pub total: u64,
    pub total_done: u64,
    pub total_wanted: u64,
    pub total_wanted_done: u64,
    /// Completion of the wanted data as a percentage.
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub paused: bool,
    pub has_metadata: bool,
    pub state: TorrentState,
    /// Connected seeds.
    pub seeders: u32,
    /// Swarm seeds, or connected seeds when the swarm total is unknown.
    pub seeders_total: u32,
    /// Connected peers that are not seeds.
    pub peers: u32,
    /// Swarm leechers, or connected peers when the swarm total is unknown.
    pub peers_total: u32,
    /// Seconds.
    pub seeding_time: u64,
    /// Seconds.
    pub finished_time: u64,
    /// Seconds.
    pub active_time: u64,
    pub all_time_download: u64,
    pub all_time_upload: u64,
}

/// Outcome of the one-time free space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpaceCheck {
    /// Disabled, already done, or not possible yet.
    Skipped,
    /// Enough space for the remaining payload.
    Sufficient,
    /// Not enough space; the torrent was paused.
    Insufficient,
}

struct TorrentInner {
    files: Option<Vec<Arc<TorrentFile>>>,
    space_checked: bool,
}

/// One torrent of the service.
pub struct Torrent {
    ctx: Arc<TorrentContext>,
    default_name: String,
    inner: Mutex<TorrentInner>,
}

impl Torrent {
    pub(crate) fn new(handle: Arc<dyn TorrentHandle>, session: Arc<SessionContext>) -> Self {
        let flags = handle.flags();
        let paused = flags.paused && !flags.auto_managed;
        let name = handle.status().name;
        let default_name = if name.is_empty() {
            handle.info_hash().to_hex()
        } else {
            name
        };
        Self {
            ctx: Arc::new(TorrentContext::new(handle, session, paused)),
            default_name,
            inner: Mutex::new(TorrentInner {
                files: None,
                space_checked: false,
            }),
        }
    }

    /// Info hash.
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        self.ctx.info_hash
    }

    /// Whether the file table is known.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        self.ctx.handle.metadata().is_some()
    }

    /// Files in torrent order; empty before metadata.
    #[must_use]
    pub fn files(&self) -> Vec<Arc<TorrentFile>> {
        let mut inner = self.lock_inner();
        self.fill_files(&mut inner);
        inner.files.clone().unwrap_or_default()
    }

    /// File by index.
    ///
    /// # Errors
    ///
    /// Returns a no-metadata error before metadata and an invalid-file error for an
    /// out-of-range index.
    pub fn file(&self, id: usize) -> ServiceResult<Arc<TorrentFile>> {
        if !self.has_metadata() {
            return Err(ServiceError::NoMetadata {
                info_hash: self.ctx.info_hash,
            });
        }
        self.files()
            .get(id)
            .cloned()
            .ok_or(ServiceError::InvalidFileId {
                info_hash: self.ctx.info_hash,
                file: id,
            })
    }

    /// Apply a priority to every file.
    ///
    /// # Errors
    ///
    /// Returns a no-metadata error before metadata.
    pub fn set_priority(&self, priority: Priority) -> ServiceResult<()> {
        for file in self.files_with_metadata()? {
            file.set_priority(priority);
        }
        Ok(())
    }

    /// Whether no file is set to "don't download".
    ///
    /// # Errors
    ///
    /// Returns a no-metadata error before metadata.
    pub fn all_files_downloading(&self) -> ServiceResult<bool> {
        Ok(self
            .files_with_metadata()?
            .iter()
            .all(|file| file.priority().is_wanted()))
    }

    /// Stop transferring and take the torrent out of the engine's queue.
    pub fn pause(&self) {
        self.pause_for(PauseReason::User);
    }

    /// Hand the torrent back to the engine's queue and start transferring.
    pub fn resume(&self) {
        self.ctx.handle.set_auto_managed(true);
        self.ctx.handle.resume();
        self.ctx.set_paused(false);
        info!(info_hash = %self.ctx.info_hash, "torrent resumed");
        self.ctx.session.events.publish(Event::TorrentResumed {
            info_hash: self.ctx.info_hash.to_hex(),
        });
    }

    /// Explicit pause flag.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.ctx.is_paused()
    }

    /// Display state across all files.
    #[must_use]
    pub fn state(&self) -> TorrentState {
        let files = self.files();
        derived_state(&self.ctx, files.iter().map(Arc::as_ref))
    }

    /// Identity and size.
    #[must_use]
    pub fn info(&self) -> TorrentInfo {
        match self.ctx.handle.metadata() {
            Some(metadata) => TorrentInfo {
                info_hash: self.ctx.info_hash,
                name: metadata.name.clone(),
                size: metadata.total_size,
            },
            None => TorrentInfo {
                info_hash: self.ctx.info_hash,
                name: self.default_name.clone(),
                size: 0,
            },
        }
    }

    /// Transfer snapshot.
    #[must_use]
    pub fn status(&self) -> TorrentStatus {
        let status = self.ctx.handle.status();
        let seeders = status.num_seeds;
        let peers = status.num_peers.saturating_sub(seeders);
        TorrentStatus {
            total: status.total,
            total_done: status.total_done,
            total_wanted: status.total_wanted,
            total_wanted_done: status.total_wanted_done,
            progress: status.progress * 100.0,
            download_rate: status.download_rate,
            upload_rate: status.upload_rate,
            paused: self.is_paused(),
            has_metadata: status.has_metadata,
            state: self.state(),
            seeders,
            seeders_total: status.num_complete.unwrap_or(seeders),
            peers,
            peers_total: status.num_incomplete.unwrap_or(peers),
            seeding_time: status.seeding_time.as_secs(),
            finished_time: status.finished_time.as_secs(),
            active_time: status.active_time.as_secs(),
            all_time_download: status.all_time_download,
            all_time_upload: status.all_time_upload,
        }
    }

    pub(crate) fn handle(&self) -> &dyn TorrentHandle {
        self.ctx.handle.as_ref()
    }

    /// Build the file list if metadata arrived. True only for the call that built it.
    pub(crate) fn populate_files(&self) -> bool {
        let mut inner = self.lock_inner();
        self.fill_files(&mut inner)
    }

    pub(crate) fn pause_for(&self, reason: PauseReason) {
        self.ctx.handle.set_auto_managed(false);
        self.ctx.handle.pause();
        self.ctx.set_paused(true);
        info!(info_hash = %self.ctx.info_hash, ?reason, "torrent paused");
        self.ctx.session.events.publish(Event::TorrentPaused {
            info_hash: self.ctx.info_hash.to_hex(),
            reason,
        });
    }

    /// Compare free space on the download volume with the bytes left to fetch, pausing
    /// the torrent when they do not fit. Runs once per torrent; a failed probe or missing
    /// metadata leaves it for the next trigger.
    pub(crate) fn check_available_space(&self) -> SpaceCheck {
        let session = &self.ctx.session;
        if !session.settings.check_available_space {
            return SpaceCheck::Skipped;
        }
        if self.lock_inner().space_checked {
            return SpaceCheck::Skipped;
        }

        let path = &session.settings.download_path;
        let available = match session.space.available_space(path) {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "unable to retrieve free space");
                return SpaceCheck::Skipped;
            }
        };
        let status = self.ctx.handle.status();
        if !status.has_metadata {
            warn!(info_hash = %self.ctx.info_hash, "missing metadata to check available space");
            return SpaceCheck::Skipped;
        }

        // The probe ran unlocked; only the first caller to get here acts on it.
        if std::mem::replace(&mut self.lock_inner().space_checked, true) {
            return SpaceCheck::Skipped;
        }
        let left = status.total.saturating_sub(status.total_done);
        info!(
            info_hash = %self.ctx.info_hash,
            path = %status.save_path.display(),
            total = status.total,
            done = status.total_done,
            left,
            available,
            "checking for sufficient space"
        );

        if available < left {
            error!(
                info_hash = %self.ctx.info_hash,
                available,
                needed = left,
                "insufficient free space"
            );
            self.pause_for(PauseReason::InsufficientSpace);
            SpaceCheck::Insufficient
        } else {
            SpaceCheck::Sufficient
        }
    }

    /// Fail every pending read on this torrent.
    pub(crate) fn close(&self) {
        self.ctx.closing.cancel();
    }

    fn files_with_metadata(&self) -> ServiceResult<Vec<Arc<TorrentFile>>> {
        if !self.has_metadata() {
            return Err(ServiceError::NoMetadata {
                info_hash: self.ctx.info_hash,
            });
        }
        Ok(self.files())
    }

    fn fill_files(&self, inner: &mut TorrentInner) -> bool {
        if inner.files.is_some() {
            return false;
        }
        let Some(metadata) = self.ctx.handle.metadata() else {
            return false;
        };
        let files = metadata
            .files
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Arc::new(TorrentFile::new(
                    Arc::clone(&self.ctx),
                    Arc::clone(&metadata),
                    index,
                    entry.clone(),
                ))
            })
            .collect();
        inner.files = Some(files);
        true
    }

    fn lock_inner(&self) -> MutexGuard<'_, TorrentInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Torrent handle of the in-process engine, plus the controls tests use to stand in for
//! the swarm.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rivulet_torrent_core::{
    Alert, AlertCategory, AlertKind, EngineError, EngineResult, HandleFlags, HandleStatus,
    InfoHash, NativeState, PartialPiece, Priority, TorrentHandle, TorrentMetadata,
};
use tracing::debug;

use crate::alerts::AlertQueue;
use crate::metainfo::{self, Info};
use crate::resume::ResumeBlob;

/// Transfer figures the in-process engine cannot produce on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferCounters {
    /// Download rate in bytes per second.
    pub download_rate: u64,
    /// Upload rate in bytes per second.
    pub upload_rate: u64,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Swarm seeds reported by trackers.
    pub num_complete: Option<u32>,
    /// Connected peers.
    pub num_peers: u32,
    /// Swarm leechers reported by trackers.
    pub num_incomplete: Option<u32>,
    /// Time spent seeding.
    pub seeding_time: Duration,
    /// Time spent finished.
    pub finished_time: Duration,
    /// Time spent active.
    pub active_time: Duration,
    /// Lifetime downloaded bytes.
    pub all_time_download: u64,
    /// Lifetime uploaded bytes.
    pub all_time_upload: u64,
}

struct HandleState {
    valid: bool,
    name: String,
    save_path: PathBuf,
    magnet: Option<String>,
    info: Option<Info>,
    metadata: Option<Arc<TorrentMetadata>>,
    native: NativeState,
    paused: bool,
    auto_managed: bool,
    file_priorities: Vec<Priority>,
    default_priority: Priority,
    piece_overrides: HashMap<u32, Priority>,
    deadlines: HashMap<u32, Duration>,
    have: Vec<bool>,
    payload: Vec<u8>,
    partial: HashMap<u32, Vec<u64>>,
    counters: TransferCounters,
    need_save_resume: bool,
}

/// Torrent held by [`crate::MemoryEngine`].
///
/// Besides the [`TorrentHandle`] surface it exposes control methods that stand in for the
/// swarm: delivering metadata, completing pieces and moving the native state.
pub struct MemoryHandle {
    info_hash: InfoHash,
    alerts: Arc<AlertQueue>,
    state: Mutex<HandleState>,
}

pub(crate) struct HandleSeed {
    pub(crate) info_hash: InfoHash,
    pub(crate) name: String,
    pub(crate) save_path: PathBuf,
    pub(crate) magnet: Option<String>,
    pub(crate) info: Option<Info>,
    pub(crate) file_priorities: Vec<Priority>,
    pub(crate) default_priority: Priority,
    pub(crate) paused: bool,
    pub(crate) auto_managed: bool,
}

impl MemoryHandle {
    pub(crate) fn new(seed: HandleSeed, alerts: Arc<AlertQueue>) -> EngineResult<Arc<Self>> {
        let handle = Arc::new(Self {
            info_hash: seed.info_hash,
            alerts,
            state: Mutex::new(HandleState {
                valid: true,
                name: seed.name,
                save_path: seed.save_path,
                magnet: seed.magnet,
                info: None,
                metadata: None,
                native: NativeState::DownloadingMetadata,
                paused: seed.paused,
                auto_managed: seed.auto_managed,
                file_priorities: seed.file_priorities,
                default_priority: seed.default_priority,
                piece_overrides: HashMap::new(),
                deadlines: HashMap::new(),
                have: Vec::new(),
                payload: Vec::new(),
                partial: HashMap::new(),
                counters: TransferCounters::default(),
                need_save_resume: true,
            }),
        });
        if let Some(info) = seed.info {
            let mut state = handle.lock();
            Self::install_info(&mut state, info)?;
            state.native = NativeState::CheckingFiles;
        }
        Ok(handle)
    }

    /// Hand the torrent its info dictionary, as a peer would for a magnet link.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not valid metainfo or belongs to another torrent.
    pub fn deliver_metadata(&self, metainfo_bytes: &[u8]) -> EngineResult<()> {
        let info = metainfo::decode(metainfo_bytes)?.info;
        if info.info_hash()? != self.info_hash {
            return Err(EngineError::InvalidMetainfo {
                reason: "info dictionary belongs to another torrent".into(),
            });
        }
        {
            let mut state = self.lock();
            if state.metadata.is_some() {
                return Ok(());
            }
            Self::install_info(&mut state, info)?;
        }
        self.push(
            AlertCategory::STATUS,
            AlertKind::MetadataReceived {
                info_hash: self.info_hash,
            },
            "metadata successfully received",
        );
        self.set_state(NativeState::Downloading);
        Ok(())
    }

    /// Store a verified piece.
    ///
    /// # Errors
    ///
    /// Returns an error without metadata or when the piece index is out of range.
    pub fn complete_piece(&self, piece: u32, data: &[u8]) -> EngineResult<()> {
        let mut state = self.lock();
        let metadata = state
            .metadata
            .clone()
            .ok_or(EngineError::MissingMetadata {
                info_hash: self.info_hash,
            })?;
        let size = metadata.piece_size(piece);
        if size == 0 {
            return Err(EngineError::Storage {
                operation: "complete_piece",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "piece index out of range",
                ),
            });
        }
        let start = usize::try_from(u64::from(piece) * metadata.piece_length).unwrap_or(usize::MAX);
        let len = usize::try_from(size).unwrap_or(usize::MAX).min(data.len());
        if let Some(target) = state.payload.get_mut(start..start + len) {
            target.copy_from_slice(&data[..len]);
        }
        if let Some(have) = state.have.get_mut(piece as usize) {
            *have = true;
        }
        state.partial.remove(&piece);
        state.deadlines.remove(&piece);
        state.need_save_resume = true;
        debug!(info_hash = %self.info_hash, piece, "piece completed");
        Ok(())
    }

    /// Store every piece from one contiguous payload.
    ///
    /// # Errors
    ///
    /// Returns an error without metadata.
    pub fn complete_all(&self, payload: &[u8]) -> EngineResult<()> {
        let metadata = self.metadata().ok_or(EngineError::MissingMetadata {
            info_hash: self.info_hash,
        })?;
        let piece_length = usize::try_from(metadata.piece_length).unwrap_or(usize::MAX);
        for piece in 0..metadata.num_pieces {
            let start = (piece as usize).saturating_mul(piece_length).min(payload.len());
            let end = start.saturating_add(piece_length).min(payload.len());
            self.complete_piece(piece, &payload[start..end])?;
        }
        Ok(())
    }

    /// Report in-flight block progress for a piece.
    pub fn set_partial(&self, piece: u32, block_bytes: Vec<u64>) {
        self.lock().partial.insert(piece, block_bytes);
    }

    /// Move the native state and emit a state-changed alert.
    pub fn set_state(&self, state: NativeState) {
        let previous = {
            let mut guard = self.lock();
            std::mem::replace(&mut guard.native, state)
        };
        if previous != state {
            self.push(
                AlertCategory::STATUS,
                AlertKind::StateChanged {
                    info_hash: self.info_hash,
                    previous,
                    state,
                },
                format!("state changed to: {state:?}"),
            );
        }
    }

    /// Adjust the transfer counters reported in the status.
    pub fn update_counters(&self, update: impl FnOnce(&mut TransferCounters)) {
        update(&mut self.lock().counters);
    }

    /// Mark whether the torrent has unsaved resume state.
    pub fn set_need_save_resume(&self, needed: bool) {
        self.lock().need_save_resume = needed;
    }

    /// Deadline last requested for a piece.
    #[must_use]
    pub fn piece_deadline(&self, piece: u32) -> Option<Duration> {
        self.lock().deadlines.get(&piece).copied()
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.lock();
        state.valid = false;
        state.payload = Vec::new();
    }

    pub(crate) fn info(&self) -> Option<Info> {
        self.lock().info.clone()
    }

    fn install_info(state: &mut HandleState, info: Info) -> EngineResult<()> {
        let metadata = info.metadata()?;
        let pieces = metadata.num_pieces as usize;
        state.name.clone_from(&metadata.name);
        state.have = vec![false; pieces];
        state.payload = vec![0; usize::try_from(metadata.total_size).unwrap_or(0)];
        let fill = state.default_priority;
        state.file_priorities.resize(metadata.files.len(), fill);
        state.metadata = Some(Arc::new(metadata));
        state.info = Some(info);
        Ok(())
    }

    fn push(&self, category: AlertCategory, kind: AlertKind, message: impl Into<String>) {
        self.alerts.push(Alert::new(category, kind, message));
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandleState {
    /// Effective piece priority: an explicit override, else the highest priority among
    /// the files overlapping the piece.
    fn piece_priority(&self, piece: u32) -> Priority {
        if let Some(priority) = self.piece_overrides.get(&piece) {
            return *priority;
        }
        let Some(metadata) = &self.metadata else {
            return Priority::DontDownload;
        };
        let start = u64::from(piece) * metadata.piece_length;
        let end = start + metadata.piece_size(piece);
        metadata
            .files
            .iter()
            .zip(&self.file_priorities)
            .filter(|(file, _)| file.offset < end && file.offset + file.length > start)
            .map(|(_, priority)| *priority)
            .max()
            .unwrap_or(Priority::DontDownload)
    }

    fn file_progress(&self) -> Vec<u64> {
        let Some(metadata) = &self.metadata else {
            return Vec::new();
        };
        metadata
            .files
            .iter()
            .map(|file| {
                if file.length == 0 {
                    return 0;
                }
                let first = file.offset / metadata.piece_length;
                let last = (file.offset + file.length - 1) / metadata.piece_length;
                (first..=last)
                    .filter(|piece| {
                        usize::try_from(*piece)
                            .ok()
                            .and_then(|idx| self.have.get(idx))
                            .copied()
                            .unwrap_or(false)
                    })
                    .map(|piece| {
                        let start = piece * metadata.piece_length;
                        let end = start + metadata.piece_length;
                        end.min(file.offset + file.length) - start.max(file.offset)
                    })
                    .sum()
            })
            .collect()
    }
}

impl TorrentHandle for MemoryHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn is_valid(&self) -> bool {
        self.lock().valid
    }

    #[allow(clippy::cast_precision_loss)]
    fn status(&self) -> HandleStatus {
        let state = self.lock();
        let mut status = HandleStatus {
            name: state.name.clone(),
            state: state.native,
            has_metadata: state.metadata.is_some(),
            paused: state.paused,
            auto_managed: state.auto_managed,
            download_rate: state.counters.download_rate,
            upload_rate: state.counters.upload_rate,
            num_seeds: state.counters.num_seeds,
            num_complete: state.counters.num_complete,
            num_peers: state.counters.num_peers,
            num_incomplete: state.counters.num_incomplete,
            seeding_time: state.counters.seeding_time,
            finished_time: state.counters.finished_time,
            active_time: state.counters.active_time,
            all_time_download: state.counters.all_time_download,
            all_time_upload: state.counters.all_time_upload,
            need_save_resume: state.need_save_resume,
            save_path: state.save_path.clone(),
            ..HandleStatus::default()
        };
        if let Some(metadata) = &state.metadata {
            let progress = state.file_progress();
            status.total = metadata.total_size;
            status.total_done = progress.iter().sum();
            for ((file, done), priority) in metadata
                .files
                .iter()
                .zip(&progress)
                .zip(&state.file_priorities)
            {
                if priority.is_wanted() {
                    status.total_wanted += file.length;
                    status.total_wanted_done += done;
                }
            }
            status.progress = if status.total_wanted == 0 {
                1.0
            } else {
                status.total_wanted_done as f64 / status.total_wanted as f64
            };
        }
        status
    }

    fn flags(&self) -> HandleFlags {
        let state = self.lock();
        HandleFlags {
            paused: state.paused,
            auto_managed: state.auto_managed,
        }
    }

    fn metadata(&self) -> Option<Arc<TorrentMetadata>> {
        self.lock().metadata.clone()
    }

    fn pause(&self) {
        self.lock().paused = true;
        self.push(
            AlertCategory::STATUS,
            AlertKind::Other {
                what: "torrent_paused".into(),
            },
            "torrent paused",
        );
    }

    fn resume(&self) {
        self.lock().paused = false;
        self.push(
            AlertCategory::STATUS,
            AlertKind::Other {
                what: "torrent_resumed".into(),
            },
            "torrent resumed",
        );
    }

    fn set_auto_managed(&self, enabled: bool) {
        self.lock().auto_managed = enabled;
    }

    fn file_priority(&self, index: usize) -> Priority {
        self.lock()
            .file_priorities
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    fn set_file_priority(&self, index: usize, priority: Priority) {
        let mut state = self.lock();
        let Some(slot) = state.file_priorities.get_mut(index) else {
            return;
        };
        *slot = priority;
        let span = state.metadata.as_ref().and_then(|metadata| {
            let file = metadata.files.get(index)?;
            let first = file.offset / metadata.piece_length;
            let last = (file.offset + file.length.max(1) - 1) / metadata.piece_length;
            Some((first, last))
        });
        if let Some((first, last)) = span {
            state
                .piece_overrides
                .retain(|piece, _| !(first..=last).contains(&u64::from(*piece)));
        }
        state.need_save_resume = true;
    }

    fn file_progress(&self) -> Vec<u64> {
        self.lock().file_progress()
    }

    fn piece_priority(&self, piece: u32) -> Priority {
        self.lock().piece_priority(piece)
    }

    fn set_piece_priority(&self, piece: u32, priority: Priority) {
        self.lock().piece_overrides.insert(piece, priority);
    }

    fn set_piece_deadline(&self, piece: u32, deadline: Duration) {
        self.lock().deadlines.insert(piece, deadline);
    }

    fn have_piece(&self, piece: u32) -> bool {
        self.lock()
            .have
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    fn download_queue(&self) -> Vec<PartialPiece> {
        let mut queue: Vec<PartialPiece> = self
            .lock()
            .partial
            .iter()
            .map(|(piece, blocks)| PartialPiece {
                piece: *piece,
                block_bytes: blocks.clone(),
            })
            .collect();
        queue.sort_by_key(|partial| partial.piece);
        queue
    }

    fn save_resume_data(&self) {
        let blob = {
            let mut state = self.lock();
            if !state.valid {
                return;
            }
            state.need_save_resume = false;
            ResumeBlob {
                info_hash: self.info_hash.as_bytes().to_vec(),
                name: state.name.clone(),
                save_path: state.save_path.to_string_lossy().into_owned(),
                info: state.info.clone(),
                magnet: state.magnet.clone(),
                file_priority: state.file_priorities.iter().map(|p| p.level()).collect(),
                paused: u8::from(state.paused),
                auto_managed: u8::from(state.auto_managed),
            }
        };
        match blob.encode() {
            Ok(payload) => self.push(
                AlertCategory::STORAGE,
                AlertKind::ResumeDataReady {
                    info_hash: self.info_hash,
                    payload,
                },
                "resume data generated",
            ),
            Err(err) => self.push(
                AlertCategory::ERROR | AlertCategory::STORAGE,
                AlertKind::Other {
                    what: "save_resume_data_failed".into(),
                },
                err.to_string(),
            ),
        }
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> EngineResult<usize> {
        let state = self.lock();
        if !state.valid {
            return Err(EngineError::InvalidHandle {
                info_hash: self.info_hash,
            });
        }
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let Some(available) = state.payload.get(start..) else {
            return Ok(0);
        };
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        Ok(len)
    }
}

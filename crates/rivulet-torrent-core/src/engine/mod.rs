//! Engine traits implemented by torrent session adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{
    AddTorrentParams, Alert, HandleFlags, HandleStatus, InfoHash, PartialPiece, Priority,
    SessionSettings, TorrentMetadata,
};

/// Torrent session owning peers, storage and the alert queue.
///
/// Calls other than [`Engine::wait_for_alerts`] are expected to return promptly; the
/// engine does its network and disk work on its own threads.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Decode a magnet URI into admission parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the URI is not a `btih` magnet link.
    fn parse_magnet(&self, uri: &str) -> EngineResult<AddTorrentParams>;

    /// Decode a bencoded `.torrent` payload into admission parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not valid metainfo.
    fn parse_metainfo(&self, bytes: &[u8]) -> EngineResult<AddTorrentParams>;

    /// Decode a resume blob previously produced by this engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob is corrupt.
    fn read_resume_data(&self, bytes: &[u8]) -> EngineResult<AddTorrentParams>;

    /// Admit a torrent and return its handle.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine rejects the torrent.
    fn add_torrent(&self, params: AddTorrentParams) -> EngineResult<Arc<dyn TorrentHandle>>;

    /// Drop a torrent, optionally deleting its payload from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown to the engine.
    fn remove_torrent(&self, info_hash: &InfoHash, delete_files: bool) -> EngineResult<()>;

    /// Produce canonical `.torrent` bytes for a torrent whose metadata is known.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown or has no metadata yet.
    fn generate_metainfo(&self, info_hash: &InfoHash) -> EngineResult<Vec<u8>>;

    /// Apply session-wide settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine rejects a setting.
    fn apply_settings(&self, settings: &SessionSettings) -> EngineResult<()>;

    /// Suspend all transfers.
    fn pause(&self);

    /// Resume transfers after [`Engine::pause`].
    fn resume(&self);

    /// Whether the session is paused.
    fn is_paused(&self) -> bool;

    /// Wait up to `max_wait` for alerts and drain everything queued.
    async fn wait_for_alerts(&self, max_wait: Duration) -> Vec<Alert>;

    /// Release the session. Handles become invalid afterwards.
    fn shutdown(&self) {}
}

/// Per-torrent handle into the engine.
pub trait TorrentHandle: Send + Sync {
    /// Identifier of the torrent.
    fn info_hash(&self) -> InfoHash;

    /// False once the torrent was removed or the session shut down.
    fn is_valid(&self) -> bool;

    /// Current status snapshot.
    fn status(&self) -> HandleStatus;

    /// Engine pause flags.
    fn flags(&self) -> HandleFlags;

    /// Decoded metadata, once available.
    fn metadata(&self) -> Option<Arc<TorrentMetadata>>;

    /// Stop transferring.
    fn pause(&self);

    /// Start transferring.
    fn resume(&self);

    /// Hand start/stop control to the engine's queue.
    fn set_auto_managed(&self, enabled: bool);

    /// Priority of a file.
    fn file_priority(&self, index: usize) -> Priority;

    /// Change the priority of a file; its pieces follow.
    fn set_file_priority(&self, index: usize, priority: Priority);

    /// Verified bytes per file, in file-table order.
    fn file_progress(&self) -> Vec<u64>;

    /// Priority of a piece.
    fn piece_priority(&self, piece: u32) -> Priority;

    /// Change the priority of a piece.
    fn set_piece_priority(&self, piece: u32, priority: Priority);

    /// Ask for a piece to be completed within `deadline`.
    fn set_piece_deadline(&self, piece: u32, deadline: Duration);

    /// Whether a piece is downloaded and verified.
    fn have_piece(&self, piece: u32) -> bool;

    /// Pieces currently in flight with their block progress.
    fn download_queue(&self) -> Vec<PartialPiece>;

    /// Request resume data; the result arrives as an alert.
    fn save_resume_data(&self);

    /// Read payload bytes at a torrent-wide offset.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage cannot be read.
    fn read(&self, offset: u64, buf: &mut [u8]) -> EngineResult<usize>;
}

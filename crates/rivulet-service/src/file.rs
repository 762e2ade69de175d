//! One file of a torrent: download priority, stream buffer window and progress.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rivulet_events::Event;
use rivulet_torrent_core::{FileEntry, Priority, TorrentMetadata};
use serde::Serialize;
use tracing::{debug, info};

use crate::context::TorrentContext;
use crate::pieces::PieceClock;
use crate::reader::FileReader;
use crate::state::{StateInputs, TorrentState, derive_state};

/// Static description of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Index within the torrent's file table.
    pub id: usize,
    /// Length in bytes.
    pub length: u64,
    /// Path relative to the download directory.
    pub path: PathBuf,
    /// Final path component.
    pub name: String,
}

/// Point-in-time progress of a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    /// Length in bytes.
    pub total: u64,
    /// Verified bytes.
    pub total_done: u64,
    /// Completion percentage.
    pub progress: f64,
    /// Download priority.
    pub priority: Priority,
    /// Completion percentage of the active stream buffer; 100 without one.
    pub buffering_progress: f64,
    /// Display state of the torrent seen through this file alone.
    pub state: TorrentState,
}

/// Outcome of checking a file's buffer from the progress monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferCheck {
    /// No buffer is being filled.
    Idle,
    /// The buffer just filled; the buffering flag was cleared.
    Completed,
    /// Buffer pieces are still missing.
    Pending,
}

#[derive(Debug, Default)]
struct BufferWindow {
    active: bool,
    pieces: Vec<u32>,
    size: u64,
}

/// One file of a torrent whose metadata is known.
pub struct TorrentFile {
    ctx: Arc<TorrentContext>,
    index: usize,
    entry: FileEntry,
    name: String,
    metadata: Arc<TorrentMetadata>,
    clock: PieceClock,
    buffer: Mutex<BufferWindow>,
}

impl TorrentFile {
    pub(crate) fn new(
        ctx: Arc<TorrentContext>,
        metadata: Arc<TorrentMetadata>,
        index: usize,
        entry: FileEntry,
    ) -> Self {
        let name = entry
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let clock = PieceClock::for_file(&metadata, &entry);
        Self {
            ctx,
            index,
            entry,
            name,
            metadata,
            clock,
            buffer: Mutex::new(BufferWindow::default()),
        }
    }

    /// Index within the torrent's file table.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.index
    }

    /// Length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.entry.length
    }

    /// Path relative to the download directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    /// Final path component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static description.
    #[must_use]
    pub fn info(&self) -> FileInfo {
        FileInfo {
            id: self.index,
            length: self.entry.length,
            path: self.entry.path.clone(),
            name: self.name.clone(),
        }
    }

    /// Progress snapshot.
    #[must_use]
    pub fn status(&self) -> FileStatus {
        let total_done = self.bytes_completed();
        FileStatus {
            total: self.entry.length,
            total_done,
            progress: percent(total_done, self.entry.length),
            priority: self.priority(),
            buffering_progress: self.buffering_progress(),
            state: derived_state(&self.ctx, [self]),
        }
    }

    /// Where the payload lands on disk.
    #[must_use]
    pub fn download_path(&self) -> PathBuf {
        self.ctx
            .session
            .settings
            .download_path
            .join(&self.entry.path)
    }

    /// Download priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.ctx.handle.file_priority(self.index)
    }

    /// Change the download priority. Dropping to "don't download" abandons the stream
    /// buffer.
    pub fn set_priority(&self, priority: Priority) {
        if !priority.is_wanted() {
            self.lock_buffer().active = false;
        }
        self.ctx.handle.set_file_priority(self.index, priority);
    }

    /// True while buffering or while the priority asks for data.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.is_buffering() || self.priority().is_wanted()
    }

    /// True while a stream buffer is being filled.
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.lock_buffer().active
    }

    /// Fetch the first `head` and last `tail` bytes ahead of everything else.
    ///
    /// Every piece in the window gets top priority and an immediate deadline. Post-buffering
    /// rate caps are lifted until the buffer fills.
    pub fn buffer(&self, head: u64, tail: u64) {
        let pieces = self.clock.buffer_pieces(head, tail);
        let mut size = 0;
        for piece in &pieces {
            self.ctx.handle.set_piece_priority(*piece, Priority::Top);
            self.ctx.handle.set_piece_deadline(*piece, Duration::ZERO);
            size += self.metadata.piece_size(*piece);
        }
        debug!(
            info_hash = %self.ctx.info_hash,
            file = self.index,
            pieces = pieces.len(),
            bytes = size,
            "buffering file"
        );
        {
            let mut window = self.lock_buffer();
            window.active = true;
            window.pieces = pieces;
            window.size = size;
        }
        self.ctx.session.set_buffering_rate_limit(false);
        self.ctx.session.events.publish(Event::BufferingStarted {
            info_hash: self.ctx.info_hash.to_hex(),
            file_index: self.index,
            bytes: size,
        });
    }

    /// Completion percentage of the stream buffer, counting partially fetched pieces.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn buffering_progress(&self) -> f64 {
        let window = self.lock_buffer();
        if !window.active || window.size == 0 {
            return 100.0;
        }
        let missing = self.bytes_missing(&window.pieces);
        (window.size.saturating_sub(missing)) as f64 / window.size as f64 * 100.0
    }

    /// Verified bytes of this file.
    #[must_use]
    pub fn bytes_completed(&self) -> u64 {
        self.ctx
            .handle
            .file_progress()
            .get(self.index)
            .copied()
            .unwrap_or(0)
    }

    /// Completion percentage.
    #[must_use]
    pub fn progress(&self) -> f64 {
        percent(self.bytes_completed(), self.entry.length)
    }

    /// Request the file at normal priority, optionally with a stream buffer of
    /// `max(1% of the file, buffer_size)` at the head and `end_buffer_size` at the tail.
    pub fn start_download(&self, buffer: bool) {
        info!(
            info_hash = %self.ctx.info_hash,
            file = %self.entry.path.display(),
            buffer,
            "starting file download"
        );
        self.set_priority(Priority::Default);
        if buffer {
            let settings = &self.ctx.session.settings;
            let head = (self.entry.length / 100).max(settings.buffer_size);
            self.buffer(head, settings.end_buffer_size);
        }
    }

    /// Open a stream with the configured read-ahead.
    #[must_use]
    pub fn new_reader(&self) -> FileReader {
        self.new_reader_with_read_ahead(self.ctx.session.settings.read_ahead)
    }

    /// Open a stream whose read-ahead window covers `fraction` of the file.
    #[must_use]
    pub fn new_reader_with_read_ahead(&self, fraction: f64) -> FileReader {
        FileReader::new(
            Arc::clone(&self.ctx),
            self.clock,
            self.clock.read_ahead_pieces(fraction),
            self.ctx.session.settings.piece_wait_timeout(),
        )
    }

    /// Clear the buffering flag once every buffer piece is present.
    pub(crate) fn check_buffer(&self) -> BufferCheck {
        let mut window = self.lock_buffer();
        if !window.active {
            return BufferCheck::Idle;
        }
        if self.bytes_missing(&window.pieces) > 0 {
            return BufferCheck::Pending;
        }
        window.active = false;
        debug!(info_hash = %self.ctx.info_hash, file = self.index, "buffer filled");
        BufferCheck::Completed
    }

    /// Bytes still needed for `pieces`, crediting blocks already received for pieces in
    /// flight.
    fn bytes_missing(&self, pieces: &[u32]) -> u64 {
        let handle = &self.ctx.handle;
        let missing: u64 = pieces
            .iter()
            .filter(|piece| !handle.have_piece(**piece))
            .map(|piece| self.metadata.piece_size(*piece))
            .sum();
        let received: u64 = handle
            .download_queue()
            .iter()
            .filter(|partial| pieces.contains(&partial.piece))
            .map(rivulet_torrent_core::PartialPiece::bytes_done)
            .sum();
        missing.saturating_sub(received)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, BufferWindow> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Display state of a torrent restricted to `files`.
pub(crate) fn derived_state<'a>(
    ctx: &TorrentContext,
    files: impl IntoIterator<Item = &'a TorrentFile>,
) -> TorrentState {
    let status = ctx.handle.status();
    let progress = ctx.handle.file_progress();
    let mut any_buffering = false;
    let mut any_wanted = false;
    let mut total = 0;
    let mut done = 0;
    for file in files {
        any_buffering |= file.is_buffering();
        if file.priority().is_wanted() {
            any_wanted = true;
            total += file.entry.length;
            done += progress.get(file.index).copied().unwrap_or(0);
        }
    }
    derive_state(&StateInputs {
        paused: ctx.is_paused(),
        flags: ctx.handle.flags(),
        has_metadata: status.has_metadata,
        native: status.state,
        any_buffering,
        any_wanted,
        wanted_progress: percent(done, total),
    })
}

/// `done` as a percentage of `total`, capped at 100; an empty total counts as complete.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

//! Byte offset to piece index arithmetic for one file of a torrent.

use std::ops::RangeInclusive;

use rivulet_torrent_core::{FileEntry, TorrentMetadata};

/// Maps positions within a file onto the torrent's pieces.
///
/// Positions are relative to the start of the file; the file begins `offset` bytes into
/// the torrent's concatenated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceClock {
    offset: u64,
    length: u64,
    piece_length: u64,
    num_pieces: u32,
}

impl PieceClock {
    /// Clock for a byte range of a torrent. A zero piece length is treated as one byte.
    #[must_use]
    pub fn new(offset: u64, length: u64, piece_length: u64, num_pieces: u32) -> Self {
        Self {
            offset,
            length,
            piece_length: piece_length.max(1),
            num_pieces,
        }
    }

    /// Clock for one entry of a torrent's file table.
    #[must_use]
    pub fn for_file(metadata: &TorrentMetadata, entry: &FileEntry) -> Self {
        Self::new(
            entry.offset,
            entry.length,
            metadata.piece_length,
            metadata.num_pieces,
        )
    }

    /// File length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Torrent-wide offset of a file position.
    #[must_use]
    pub const fn torrent_offset(&self, pos: u64) -> u64 {
        self.offset + pos
    }

    /// Piece holding the byte at `pos`, capped at the torrent's last piece.
    #[must_use]
    pub fn piece_at(&self, pos: u64) -> u32 {
        let piece = self.torrent_offset(pos) / self.piece_length;
        u32::try_from(piece)
            .unwrap_or(u32::MAX)
            .min(self.num_pieces.saturating_sub(1))
    }

    /// Piece holding the first byte of the file.
    #[must_use]
    pub fn first_piece(&self) -> u32 {
        self.piece_at(0)
    }

    /// Piece holding the last byte of the file.
    #[must_use]
    pub fn last_piece(&self) -> u32 {
        self.piece_at(self.length.saturating_sub(1))
    }

    /// Pieces covering `len` bytes from `start`, clamped to the file. `None` when the range
    /// holds no byte of the file.
    #[must_use]
    pub fn span(&self, start: u64, len: u64) -> Option<RangeInclusive<u32>> {
        if len == 0 || start >= self.length {
            return None;
        }
        let end = start.saturating_add(len).min(self.length);
        Some(self.piece_at(start)..=self.piece_at(end - 1))
    }

    /// Read-ahead window in pieces for a fraction of the file length, rounded to nearest.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn read_ahead_pieces(&self, fraction: f64) -> u32 {
        let pieces = 0.5 + fraction * self.length as f64 / self.piece_length as f64;
        if pieces.is_finite() && pieces > 0.0 {
            pieces.min(f64::from(u32::MAX)) as u32
        } else {
            0
        }
    }

    /// Pieces covering the first `head` and last `tail` bytes, or the whole file when it is
    /// smaller than both together. Sorted, without duplicates.
    #[must_use]
    pub fn buffer_pieces(&self, head: u64, tail: u64) -> Vec<u32> {
        let mut pieces: Vec<u32> = if self.length < head.saturating_add(tail) {
            self.span(0, self.length).into_iter().flatten().collect()
        } else {
            let head_span = self.span(0, head).into_iter().flatten();
            let tail_span = self
                .span(self.length - tail, tail)
                .into_iter()
                .flatten();
            head_span.chain(tail_span).collect()
        };
        pieces.sort_unstable();
        pieces.dedup();
        pieces
    }
}

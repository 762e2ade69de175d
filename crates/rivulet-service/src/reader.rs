//! Seekable stream over one file of a torrent that is still downloading.
//!
//! A read raises the priority of the pieces it needs plus a read-ahead window, then waits
//! for the engine to report them. Waits poll on a fixed interval and end early when the
//! service, the torrent or the reader is closed, or when a registered consumer signal
//! fires.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use rivulet_torrent_core::{Priority, TorrentHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::TorrentContext;
use crate::error::{ServiceError, ServiceResult};
use crate::pieces::PieceClock;

/// Interval between piece availability checks.
pub const PIECE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Deadline step per piece of distance from the requested range.
const READ_AHEAD_DEADLINE_STEP: Duration = Duration::from_millis(10);

/// Stream over one file.
pub struct FileReader {
    ctx: Arc<TorrentContext>,
    clock: PieceClock,
    pos: u64,
    priority_pieces: u32,
    wait_timeout: Option<Duration>,
    closing: CancellationToken,
    cancellations: Vec<CancellationToken>,
}

/// Closes a [`FileReader`] from another task.
#[derive(Debug, Clone)]
pub struct ReaderCloser(CancellationToken);

impl ReaderCloser {
    /// Close the reader; pending and later reads fail with a reader-closed error.
    pub fn close(&self) {
        self.0.cancel();
    }
}

impl FileReader {
    pub(crate) fn new(
        ctx: Arc<TorrentContext>,
        clock: PieceClock,
        priority_pieces: u32,
        wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            clock,
            pos: 0,
            priority_pieces,
            wait_timeout,
            closing: CancellationToken::new(),
            cancellations: Vec::new(),
        }
    }

    /// File length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.clock.length()
    }

    /// Current position within the file.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Fail pending waits with a consumer-disconnected error once `signal` is cancelled.
    pub fn register_cancellation(&mut self, signal: CancellationToken) {
        self.cancellations.push(signal);
    }

    /// Handle that closes this reader from elsewhere.
    #[must_use]
    pub fn closer(&self) -> ReaderCloser {
        ReaderCloser(self.closing.clone())
    }

    /// Close the reader. Idempotent.
    pub fn close(&self) {
        debug!(info_hash = %self.ctx.info_hash, "closing reader");
        self.closing.cancel();
    }

    /// Read at the current position, waiting for the pieces involved.
    ///
    /// Returns `Ok(0)` at the end of the file.
    ///
    /// # Errors
    ///
    /// Returns a closed error when the service, torrent or reader closes, a
    /// consumer-disconnected error when a registered signal fires, a timeout when a piece
    /// does not arrive in time, or an engine error when the read itself fails.
    pub async fn read(&mut self, buf: &mut [u8]) -> ServiceResult<usize> {
        self.check_open()?;
        let remaining = self.clock.length().saturating_sub(self.pos);
        let want = remaining.min(u64::try_from(buf.len()).unwrap_or(u64::MAX));
        let Some(span) = self.clock.span(self.pos, want) else {
            return Ok(0);
        };

        let (first, last) = (*span.start(), *span.end());
        self.prioritize(first, last - first);
        for piece in span {
            if !self.ctx.handle.have_piece(piece) {
                self.wait_for_piece(piece).await?;
            }
        }
        self.check_open()?;

        let len = usize::try_from(want).unwrap_or(buf.len()).min(buf.len());
        let read = self
            .ctx
            .handle
            .read(self.clock.torrent_offset(self.pos), &mut buf[..len])
            .map_err(|err| ServiceError::engine("handle.read", err))?;
        self.pos += u64::try_from(read).unwrap_or(0);
        Ok(read)
    }

    /// Move the position and re-prioritize pieces around it. `SeekFrom::End(n)` targets
    /// `length + n`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-seek error, leaving the position unchanged, when the target lies
    /// outside `[0, length]`.
    pub fn seek(&mut self, pos: SeekFrom) -> ServiceResult<u64> {
        let length = self.clock.length();
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(length) + i128::from(delta),
        };
        let pos = u64::try_from(target)
            .ok()
            .filter(|pos| *pos <= length)
            .ok_or(ServiceError::InvalidSeek {
                offset: target,
                length,
            })?;
        self.pos = pos;
        self.prioritize(self.clock.piece_at(pos), 0);
        Ok(pos)
    }

    /// Raise `start..=start+span` to top priority with an immediate deadline and the
    /// read-ahead pieces after it to high priority with deadlines growing with distance.
    /// Pieces already present are skipped and priorities are never lowered.
    fn prioritize(&self, start: u32, span: u32) {
        let handle = self.ctx.handle.as_ref();
        let end = start
            .saturating_add(span)
            .saturating_add(self.priority_pieces)
            .min(self.clock.last_piece());
        for (distance, piece) in (start..=end).enumerate() {
            if handle.have_piece(piece) {
                continue;
            }
            let distance = u32::try_from(distance).unwrap_or(u32::MAX);
            if distance <= span {
                raise(handle, piece, Priority::Top, Duration::ZERO);
            } else {
                raise(
                    handle,
                    piece,
                    Priority::High,
                    READ_AHEAD_DEADLINE_STEP * (distance - span),
                );
            }
        }
    }

    async fn wait_for_piece(&self, piece: u32) -> ServiceResult<()> {
        debug!(info_hash = %self.ctx.info_hash, piece, "waiting for piece");
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + PIECE_POLL_INTERVAL, PIECE_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.ctx.handle.have_piece(piece) {
            tokio::select! {
                biased;
                () = self.ctx.session.closing.cancelled() => return Err(ServiceError::ServiceClosed),
                () = self.ctx.closing.cancelled() => {
                    return Err(ServiceError::TorrentClosed {
                        info_hash: self.ctx.info_hash,
                    });
                }
                () = self.closing.cancelled() => return Err(ServiceError::ReaderClosed),
                _ = ticker.tick() => {
                    let waited = started.elapsed();
                    if self.wait_timeout.is_some_and(|limit| waited >= limit) {
                        warn!(
                            info_hash = %self.ctx.info_hash,
                            piece,
                            priority = ?self.ctx.handle.piece_priority(piece),
                            "timed out waiting for piece"
                        );
                        return Err(ServiceError::Timeout { piece, waited });
                    }
                    if self.cancellations.iter().any(CancellationToken::is_cancelled) {
                        debug!(info_hash = %self.ctx.info_hash, "stream consumer went away");
                        return Err(ServiceError::ConsumerDisconnected);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_open(&self) -> ServiceResult<()> {
        if self.ctx.session.is_closed() {
            Err(ServiceError::ServiceClosed)
        } else if self.ctx.closing.is_cancelled() {
            Err(ServiceError::TorrentClosed {
                info_hash: self.ctx.info_hash,
            })
        } else if self.closing.is_cancelled() {
            Err(ServiceError::ReaderClosed)
        } else {
            Ok(())
        }
    }
}

fn raise(handle: &dyn TorrentHandle, piece: u32, priority: Priority, deadline: Duration) {
    if handle.piece_priority(piece) < priority {
        handle.set_piece_priority(piece, priority);
        handle.set_piece_deadline(piece, deadline);
    }
}

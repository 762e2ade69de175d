#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Multi-torrent download service with progressive streaming of file content.
//!
//! Layout: `service.rs` (torrent registry, add/remove/restore, lifecycle), `torrent.rs`,
//! `file.rs` (priorities and stream buffers), `reader.rs` (piece-aware stream reads),
//! `pieces.rs` (byte range to piece arithmetic), `state.rs` (display state),
//! `persist.rs` (sidecar files), `context.rs` (shared session and torrent context),
//! `space.rs` (free space probe), `tasks/` (alert pump, progress monitor, resume persister).

mod context;
pub mod error;
mod file;
mod persist;
mod pieces;
mod reader;
mod service;
mod space;
mod state;
mod tasks;
mod torrent;

pub use error::{ServiceError, ServiceResult};
pub use file::{FileInfo, FileStatus, TorrentFile};
pub use pieces::PieceClock;
pub use reader::{FileReader, PIECE_POLL_INTERVAL, ReaderCloser};
pub use rivulet_torrent_core::{InfoHash, Priority};
pub use service::{Service, ServiceBuilder, ServiceStatus};
pub use space::{FsSpaceProbe, SpaceProbe};
pub use state::TorrentState;
pub use tokio_util::sync::CancellationToken;
pub use torrent::{Torrent, TorrentInfo, TorrentStatus};

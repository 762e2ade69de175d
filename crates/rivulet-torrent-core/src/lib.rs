#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic torrent interfaces and DTOs.
//!
//! Layout: `model/` (identifiers, priorities, metadata, status and alerts),
//! `engine/` (the `Engine` session trait and per-torrent `TorrentHandle`), `error.rs`.

pub mod engine;
pub mod error;
pub mod model;

pub use engine::{Engine, TorrentHandle};
pub use error::{EngineError, EngineResult};
pub use model::{
    AddTorrentParams, Alert, AlertCategory, AlertKind, EncryptionMode, FileEntry, HandleFlags,
    HandleStatus, InfoHash, NativeState, PartialPiece, Priority, SessionSettings,
    TorrentMetadata, TorrentSource,
};

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

//! In-process torrent engine.
//!
//! Decodes real metainfo and magnet links and keeps piece payloads in memory; nothing is
//! exchanged with peers. Pieces, native states and transfer counters are driven through
//! the control methods on [`MemoryHandle`], which makes the engine the test double for the
//! streaming service as well as the engine the daemon boots with when no network engine is
//! linked in.
//!
//! Layout: `session.rs` (`MemoryEngine`), `handle.rs` (`MemoryHandle`), `metainfo.rs`
//! (bencoded `.torrent` codec), `magnet.rs`, `resume.rs` (resume blob codec), `alerts.rs`.

mod alerts;
mod handle;
mod magnet;
pub mod metainfo;
mod resume;
mod session;

pub use handle::{MemoryHandle, TransferCounters};
pub use metainfo::build_metainfo;
pub use session::MemoryEngine;

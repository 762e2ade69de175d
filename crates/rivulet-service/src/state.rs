//! Display state derived from pause flags, engine state and file flags.

use rivulet_torrent_core::{HandleFlags, NativeState};
use serde::{Deserialize, Serialize};

/// State shown for a torrent or one of its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Paused by the engine's own queue.
    Queued,
    /// Verifying data on disk.
    Checking,
    /// Waiting for metadata.
    Finding,
    /// Fetching wanted data.
    Downloading,
    /// Every wanted byte is present.
    Finished,
    /// Complete and uploading.
    Seeding,
    /// Allocating storage.
    Allocating,
    /// Validating resume data.
    CheckingResumeData,
    /// Paused explicitly.
    Paused,
    /// A stream buffer is being filled.
    Buffering,
}

/// Everything the state derivation looks at, captured at one instant.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateInputs {
    pub(crate) paused: bool,
    pub(crate) flags: HandleFlags,
    pub(crate) has_metadata: bool,
    pub(crate) native: NativeState,
    pub(crate) any_buffering: bool,
    pub(crate) any_wanted: bool,
    /// Completion percentage of the wanted files.
    pub(crate) wanted_progress: f64,
}

/// First match wins: explicit pause, engine queue, missing metadata, then the native state
/// with "downloading" refined by the file flags.
pub(crate) fn derive_state(inputs: &StateInputs) -> TorrentState {
    if inputs.paused {
        return TorrentState::Paused;
    }
    if inputs.flags.paused && inputs.flags.auto_managed {
        return TorrentState::Queued;
    }
    if !inputs.has_metadata {
        return TorrentState::Finding;
    }
    match inputs.native {
        NativeState::CheckingFiles => TorrentState::Checking,
        NativeState::DownloadingMetadata => TorrentState::Finding,
        NativeState::Finished => TorrentState::Finished,
        NativeState::Seeding => TorrentState::Seeding,
        NativeState::Allocating => TorrentState::Allocating,
        NativeState::CheckingResumeData => TorrentState::CheckingResumeData,
        NativeState::Downloading => {
            if inputs.any_buffering {
                TorrentState::Buffering
            } else if !inputs.any_wanted || inputs.wanted_progress >= 100.0 {
                TorrentState::Finished
            } else {
                TorrentState::Downloading
            }
        }
    }
}

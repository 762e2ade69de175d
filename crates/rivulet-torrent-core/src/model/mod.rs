//! Shared data model exchanged between the streaming service and engine adapters.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

mod alert;

pub use alert::{Alert, AlertCategory, AlertKind};

/// Content identifier of a torrent: the SHA-1 of its bencoded info dictionary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Length of the raw identifier in bytes.
    pub const LEN: usize = 20;

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering used for sidecar file names and external keys.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40 character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInfoHash`] when the text is not 20 hex-encoded bytes.
    pub fn from_hex(value: &str) -> Result<Self, EngineError> {
        let mut bytes = [0_u8; 20];
        hex::decode_to_slice(value, &mut bytes).map_err(|_| EngineError::InvalidInfoHash {
            value: value.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Build from a byte slice that must be exactly 20 bytes long.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInfoHash`] on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EngineError> {
        <[u8; 20]>::try_from(bytes)
            .map(Self)
            .map_err(|_| EngineError::InvalidInfoHash {
                value: hex::encode(bytes),
            })
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_hex(value)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Download priority understood by the engine, ordered from "skip" to "fetch first".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Level 0: the data is not wanted.
    DontDownload,
    /// Level 1.
    Low,
    /// Level 4: normal sequential acquisition.
    #[default]
    Default,
    /// Level 6.
    High,
    /// Level 7: fetched ahead of everything else.
    Top,
}

impl Priority {
    /// Numeric level used by the engine.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::DontDownload => 0,
            Self::Low => 1,
            Self::Default => 4,
            Self::High => 6,
            Self::Top => 7,
        }
    }

    /// Map a numeric level back to a priority; only the five engine levels are accepted.
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::DontDownload),
            1 => Some(Self::Low),
            4 => Some(Self::Default),
            6 => Some(Self::High),
            7 => Some(Self::Top),
            _ => None,
        }
    }

    /// Whether the engine should fetch data at this level.
    #[must_use]
    pub const fn is_wanted(self) -> bool {
        !matches!(self, Self::DontDownload)
    }
}

/// Engine-native torrent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeState {
    /// Verifying pieces already on disk.
    CheckingFiles,
    /// Waiting for the info dictionary from peers.
    #[default]
    DownloadingMetadata,
    /// Fetching payload.
    Downloading,
    /// All wanted data is present.
    Finished,
    /// All data is present and being uploaded.
    Seeding,
    /// Reserving disk space.
    Allocating,
    /// Validating resume data.
    CheckingResumeData,
}

/// Where the engine should source the torrent description from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// Magnet link; metadata arrives later from peers.
    Magnet {
        /// Original URI.
        uri: String,
    },
    /// Raw bencoded `.torrent` payload.
    Metainfo {
        /// Encoded metainfo bytes.
        bytes: Vec<u8>,
    },
    /// Engine resume blob.
    Resume {
        /// Encoded resume bytes.
        bytes: Vec<u8>,
    },
}

/// Parameters used to admit a torrent into the engine.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    /// Identifier of the torrent.
    pub info_hash: InfoHash,
    /// Display name hint (magnet `dn` or metainfo name).
    pub name: Option<String>,
    /// Description the engine admits the torrent from.
    pub source: TorrentSource,
    /// Directory payload is written under.
    pub save_path: PathBuf,
    /// Initial per-file priorities; entries beyond the file count are ignored.
    pub file_priorities: Vec<Priority>,
    /// Priority of every file `file_priorities` does not cover, including files only
    /// known once metadata arrives.
    pub default_file_priority: Priority,
    /// Start in the paused state.
    pub paused: bool,
    /// Let the engine queue the torrent.
    pub auto_managed: bool,
}

impl AddTorrentParams {
    /// Parameters with engine defaults for the given identifier and source.
    #[must_use]
    pub const fn new(info_hash: InfoHash, source: TorrentSource) -> Self {
        Self {
            info_hash,
            name: None,
            source,
            save_path: PathBuf::new(),
            file_priorities: Vec::new(),
            default_file_priority: Priority::Default,
            paused: false,
            auto_managed: true,
        }
    }
}

/// Single file entry of a torrent's file table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the save path.
    pub path: PathBuf,
    /// Byte offset of the file within the torrent's concatenated payload.
    pub offset: u64,
    /// File length in bytes.
    pub length: u64,
}

/// Metadata decoded from a torrent's info dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    /// Torrent name.
    pub name: String,
    /// Nominal piece length in bytes.
    pub piece_length: u64,
    /// Total payload size.
    pub total_size: u64,
    /// Number of pieces.
    pub num_pieces: u32,
    /// File table in torrent order.
    pub files: Vec<FileEntry>,
}

impl TorrentMetadata {
    /// Build metadata from a file table, deriving offsets, total size and piece count.
    #[must_use]
    pub fn from_files(name: String, piece_length: u64, files: Vec<(PathBuf, u64)>) -> Self {
        let mut offset = 0;
        let files: Vec<FileEntry> = files
            .into_iter()
            .map(|(path, length)| {
                let entry = FileEntry {
                    path,
                    offset,
                    length,
                };
                offset += length;
                entry
            })
            .collect();
        let num_pieces = if piece_length == 0 {
            0
        } else {
            u32::try_from(offset.div_ceil(piece_length)).unwrap_or(u32::MAX)
        };
        Self {
            name,
            piece_length,
            total_size: offset,
            num_pieces,
            files,
        }
    }

    /// Exact size of a piece; the final piece may be shorter than the nominal length.
    #[must_use]
    pub fn piece_size(&self, piece: u32) -> u64 {
        if piece >= self.num_pieces {
            return 0;
        }
        let start = u64::from(piece) * self.piece_length;
        self.piece_length.min(self.total_size - start)
    }
}

/// Block-level progress of a piece currently being fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialPiece {
    /// Piece index.
    pub piece: u32,
    /// Bytes received for each block of the piece.
    pub block_bytes: Vec<u64>,
}

impl PartialPiece {
    /// Bytes already received for this piece.
    #[must_use]
    pub fn bytes_done(&self) -> u64 {
        self.block_bytes.iter().sum()
    }
}

/// Engine-side pause flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleFlags {
    /// The engine is not transferring for this torrent.
    pub paused: bool,
    /// The engine's queue manages start/stop.
    pub auto_managed: bool,
}

/// Point-in-time status reported by the engine for one torrent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandleStatus {
    /// Torrent name, empty before metadata.
    pub name: String,
    /// Native lifecycle state.
    pub state: NativeState,
    /// Metadata has been received.
    pub has_metadata: bool,
    /// Engine pause flag.
    pub paused: bool,
    /// Engine auto-managed flag.
    pub auto_managed: bool,
    /// Completion of the wanted data, 0.0 to 1.0.
    pub progress: f64,
    /// Payload download rate in bytes per second.
    pub download_rate: u64,
    /// Payload upload rate in bytes per second.
    pub upload_rate: u64,
    /// Total payload size.
    pub total: u64,
    /// Payload bytes verified on disk.
    pub total_done: u64,
    /// Bytes selected for download.
    pub total_wanted: u64,
    /// Selected bytes verified on disk.
    pub total_wanted_done: u64,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Seeds in the swarm according to trackers, when known.
    pub num_complete: Option<u32>,
    /// Connected peers.
    pub num_peers: u32,
    /// Leechers in the swarm according to trackers, when known.
    pub num_incomplete: Option<u32>,
    /// Time spent seeding.
    pub seeding_time: Duration,
    /// Time spent finished (includes seeding).
    pub finished_time: Duration,
    /// Time spent active.
    pub active_time: Duration,
    /// Bytes downloaded over the torrent's lifetime.
    pub all_time_download: u64,
    /// Bytes uploaded over the torrent's lifetime.
    pub all_time_upload: u64,
    /// State changed since the last resume data was produced.
    pub need_save_resume: bool,
    /// Directory payload is written under.
    pub save_path: PathBuf,
}

/// Peer-connection encryption preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Accept both encrypted and plaintext peers.
    #[default]
    Enabled,
    /// Plaintext only.
    Disabled,
    /// Encrypted only.
    Forced,
}

/// Session-wide settings pushed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSettings {
    /// Peer user agent; empty keeps the engine default.
    pub user_agent: String,
    /// Listening port.
    pub listen_port: u16,
    /// Comma separated listen interfaces.
    pub listen_interfaces: String,
    /// Comma separated outgoing interfaces.
    pub outgoing_interfaces: String,
    /// Download cap in bytes per second, 0 for unlimited.
    pub download_rate_limit: u64,
    /// Upload cap in bytes per second, 0 for unlimited.
    pub upload_rate_limit: u64,
    /// Maximum peer connections, 0 for the engine default.
    pub connections_limit: u32,
    /// Peer-connection encryption.
    pub encryption: EncryptionMode,
    /// DHT node.
    pub enable_dht: bool,
    /// Local service discovery.
    pub enable_lsd: bool,
    /// `UPnP` port mapping.
    pub enable_upnp: bool,
    /// NAT-PMP port mapping.
    pub enable_natpmp: bool,
}

impl SessionSettings {
    /// Copy of these settings with every discovery service switched off.
    #[must_use]
    pub fn without_discovery(&self) -> Self {
        Self {
            enable_dht: false,
            enable_lsd: false,
            enable_upnp: false,
            enable_natpmp: false,
            ..self.clone()
        }
    }
}

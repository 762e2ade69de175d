//! Error types for torrent engine operations.

use std::io;

use thiserror::Error;

use crate::model::InfoHash;

/// Primary error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Magnet URI could not be parsed.
    #[error("invalid magnet uri: {reason}")]
    InvalidMagnet {
        /// Offending URI.
        uri: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Torrent metainfo could not be decoded.
    #[error("invalid torrent metainfo: {reason}")]
    InvalidMetainfo {
        /// Decoder detail.
        reason: String,
    },
    /// Resume data could not be decoded.
    #[error("invalid resume data: {reason}")]
    InvalidResumeData {
        /// Decoder detail.
        reason: String,
    },
    /// Info hash text was malformed.
    #[error("invalid info hash")]
    InvalidInfoHash {
        /// Offending value.
        value: String,
    },
    /// The engine already holds a handle for the torrent.
    #[error("torrent already present in engine")]
    DuplicateHandle {
        /// Info hash of the torrent.
        info_hash: InfoHash,
    },
    /// The handle was released or never existed.
    #[error("torrent handle is not valid")]
    InvalidHandle {
        /// Info hash of the torrent.
        info_hash: InfoHash,
    },
    /// The operation needs metadata that has not been received yet.
    #[error("torrent metadata not available")]
    MissingMetadata {
        /// Info hash of the torrent.
        info_hash: InfoHash,
    },
    /// Storage access failed.
    #[error("storage operation failed")]
    Storage {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Convenience alias for engine operation results.
pub type EngineResult<T> = Result<T, EngineError>;

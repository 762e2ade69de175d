//! # Design
//!
//! - One error enum for every service, torrent, file and reader operation.
//! - The three "closed" variants stay distinct so a stream consumer can tell whether the
//!   daemon, the torrent or only its own reader went away.
//! - Engine failures keep the engine error as their source; nothing is logged here.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rivulet_torrent_core::{EngineError, InfoHash};
use thiserror::Error;

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures surfaced by the streaming service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The torrent is already part of the active set.
    #[error("torrent was previously added")]
    Duplicate {
        /// Info hash of the torrent.
        info_hash: InfoHash,
    },
    /// The engine could not parse or admit the torrent.
    #[error("failed loading torrent")]
    LoadTorrent {
        /// Operation identifier.
        operation: &'static str,
        /// Engine error.
        #[source]
        source: EngineError,
    },
    /// No torrent with this info hash is active.
    #[error("no such info hash")]
    NotFound {
        /// Requested info hash.
        info_hash: InfoHash,
    },
    /// The file index is outside the torrent's file table.
    #[error("no such file id")]
    InvalidFileId {
        /// Torrent the lookup ran against.
        info_hash: InfoHash,
        /// Requested file index.
        file: usize,
    },
    /// The operation needs the file table, which has not arrived yet.
    #[error("torrent metadata not available")]
    NoMetadata {
        /// Torrent without metadata.
        info_hash: InfoHash,
    },
    /// The service shut down while the operation was pending.
    #[error("service was closed")]
    ServiceClosed,
    /// The torrent was removed while the operation was pending.
    #[error("torrent was closed")]
    TorrentClosed {
        /// Removed torrent.
        info_hash: InfoHash,
    },
    /// The reader was closed.
    #[error("reader was closed")]
    ReaderClosed,
    /// The stream consumer went away.
    #[error("reader close notify received")]
    ConsumerDisconnected,
    /// A piece did not arrive within the wait budget.
    #[error("timeout reached")]
    Timeout {
        /// Piece the reader waited for.
        piece: u32,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Seek target outside the file.
    #[error("invalid seek position")]
    InvalidSeek {
        /// Requested absolute position.
        offset: i128,
        /// File length.
        length: u64,
    },
    /// An engine call failed.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Engine error.
        #[source]
        source: EngineError,
    },
    /// Filesystem access failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl ServiceError {
    pub(crate) const fn engine(operation: &'static str, source: EngineError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure means the service, the torrent or the reader went away.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ServiceClosed
                | Self::TorrentClosed { .. }
                | Self::ReaderClosed
                | Self::ConsumerDisconnected
        )
    }
}

impl From<ServiceError> for io::Error {
    fn from(err: ServiceError) -> Self {
        let kind = match &err {
            ServiceError::Timeout { .. } => io::ErrorKind::TimedOut,
            ServiceError::InvalidSeek { .. } => io::ErrorKind::InvalidInput,
            ServiceError::NotFound { .. } | ServiceError::InvalidFileId { .. } => {
                io::ErrorKind::NotFound
            }
            ServiceError::Io { source, .. } => source.kind(),
            _ if err.is_closed() => io::ErrorKind::ConnectionAborted,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

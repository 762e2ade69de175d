//! Bencoded `.torrent` codec.

use std::path::PathBuf;

use rivulet_torrent_core::{EngineError, EngineResult, InfoHash, TorrentMetadata};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

const PIECE_HASH_LEN: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Metainfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) announce: Option<String>,
    pub(crate) info: Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Info {
    pub(crate) name: String,
    #[serde(rename = "piece length")]
    pub(crate) piece_length: u64,
    #[serde(with = "serde_bytes")]
    pub(crate) pieces: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) files: Option<Vec<InfoFile>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct InfoFile {
    pub(crate) length: u64,
    pub(crate) path: Vec<String>,
}

impl Info {
    pub(crate) fn info_hash(&self) -> EngineResult<InfoHash> {
        let encoded = serde_bencode::to_bytes(self).map_err(|err| EngineError::InvalidMetainfo {
            reason: err.to_string(),
        })?;
        let digest: [u8; 20] = Sha1::digest(&encoded).into();
        Ok(InfoHash::new(digest))
    }

    /// File table and piece geometry, checked for internal consistency.
    pub(crate) fn metadata(&self) -> EngineResult<TorrentMetadata> {
        if self.piece_length == 0 {
            return Err(invalid("piece length is zero"));
        }
        let files = match (&self.length, &self.files) {
            (Some(length), None) => vec![(PathBuf::from(&self.name), *length)],
            (None, Some(files)) if !files.is_empty() => files
                .iter()
                .map(|file| {
                    let mut path = PathBuf::from(&self.name);
                    path.extend(&file.path);
                    (path, file.length)
                })
                .collect(),
            _ => return Err(invalid("info must hold either a length or a file list")),
        };
        let metadata = TorrentMetadata::from_files(self.name.clone(), self.piece_length, files);
        let expected = usize::try_from(metadata.num_pieces)
            .map_err(|_| invalid("too many pieces"))?
            * PIECE_HASH_LEN;
        if self.pieces.len() != expected {
            return Err(invalid("piece hash table does not match payload size"));
        }
        Ok(metadata)
    }
}

pub(crate) fn decode(bytes: &[u8]) -> EngineResult<Metainfo> {
    serde_bencode::from_bytes(bytes).map_err(|err| EngineError::InvalidMetainfo {
        reason: err.to_string(),
    })
}

pub(crate) fn encode(info: &Info) -> EngineResult<Vec<u8>> {
    let metainfo = Metainfo {
        announce: None,
        info: info.clone(),
    };
    serde_bencode::to_bytes(&metainfo).map_err(|err| EngineError::InvalidMetainfo {
        reason: err.to_string(),
    })
}

/// Build a minimal `.torrent` payload for the given file table.
///
/// A single entry produces a single-file torrent named after it; several entries produce a
/// multi-file torrent under `name`. Piece hashes are zeroed.
///
/// # Errors
///
/// Returns an error when the geometry is invalid (zero piece length or no files).
pub fn build_metainfo(name: &str, piece_length: u64, files: &[(&str, u64)]) -> EngineResult<Vec<u8>> {
    let info = match files {
        [] => return Err(invalid("no files")),
        [(file_name, length)] => Info {
            name: (*file_name).to_string(),
            piece_length,
            pieces: Vec::new(),
            length: Some(*length),
            files: None,
        },
        many => Info {
            name: name.to_string(),
            piece_length,
            pieces: Vec::new(),
            length: None,
            files: Some(
                many.iter()
                    .map(|(path, length)| InfoFile {
                        length: *length,
                        path: path.split('/').map(str::to_string).collect(),
                    })
                    .collect(),
            ),
        },
    };
    if piece_length == 0 {
        return Err(invalid("piece length is zero"));
    }
    let total: u64 = files.iter().map(|(_, length)| length).sum();
    let num_pieces =
        usize::try_from(total.div_ceil(piece_length)).map_err(|_| invalid("too many pieces"))?;
    let info = Info {
        pieces: vec![0; num_pieces * PIECE_HASH_LEN],
        ..info
    };
    encode(&info)
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidMetainfo {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_payload_decodes_to_consistent_metadata() -> anyhow::Result<()> {
        let bytes = build_metainfo("season", 32, &[("e01.mkv", 100), ("subs/e01.srt", 10)])?;
        let decoded = decode(&bytes)?;
        let metadata = decoded.info.metadata()?;
        assert_eq!(metadata.name, "season");
        assert_eq!(metadata.total_size, 110);
        assert_eq!(metadata.num_pieces, 4);
        assert_eq!(metadata.files[1].path, PathBuf::from("season/subs/e01.srt"));
        assert_eq!(metadata.files[1].offset, 100);
        Ok(())
    }

    #[test]
    fn info_hash_is_stable_across_reencoding() -> anyhow::Result<()> {
        let bytes = build_metainfo("movie", 16, &[("movie.mp4", 40)])?;
        let first = decode(&bytes)?.info;
        let second = decode(&encode(&first)?)?.info;
        assert_eq!(first.info_hash()?, second.info_hash()?);
        Ok(())
    }

    #[test]
    fn rejects_garbage_and_inconsistent_tables() -> anyhow::Result<()> {
        assert!(decode(b"not bencode").is_err());

        let mut info = decode(&build_metainfo("movie", 16, &[("movie.mp4", 40)])?)?.info;
        info.pieces.truncate(20);
        assert!(matches!(
            info.metadata(),
            Err(EngineError::InvalidMetainfo { .. })
        ));
        Ok(())
    }
}

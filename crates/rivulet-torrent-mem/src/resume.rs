//! Bencoded resume data.

use rivulet_torrent_core::{EngineError, EngineResult, InfoHash, Priority};
use serde::{Deserialize, Serialize};

use crate::metainfo::Info;

/// Bencoded resume blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResumeBlob {
    #[serde(rename = "info-hash", with = "serde_bytes")]
    pub(crate) info_hash: Vec<u8>,
    pub(crate) name: String,
    pub(crate) save_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) info: Option<Info>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) magnet: Option<String>,
    #[serde(default, with = "serde_bytes")]
    pub(crate) file_priority: Vec<u8>,
    #[serde(default)]
    pub(crate) paused: u8,
    #[serde(default)]
    pub(crate) auto_managed: u8,
}

impl ResumeBlob {
    pub(crate) fn decode(bytes: &[u8]) -> EngineResult<Self> {
        let blob: Self = serde_bencode::from_bytes(bytes).map_err(|err| invalid(&err.to_string()))?;
        let info_hash = blob.info_hash()?;
        if let Some(info) = &blob.info {
            if info.info_hash()? != info_hash {
                return Err(invalid("info dictionary does not match info-hash"));
            }
        }
        Ok(blob)
    }

    pub(crate) fn encode(&self) -> EngineResult<Vec<u8>> {
        serde_bencode::to_bytes(self).map_err(|err| invalid(&err.to_string()))
    }

    pub(crate) fn info_hash(&self) -> EngineResult<InfoHash> {
        InfoHash::from_slice(&self.info_hash).map_err(|_| invalid("info-hash must be 20 bytes"))
    }

    pub(crate) fn file_priorities(&self) -> Vec<Priority> {
        self.file_priority
            .iter()
            .map(|level| Priority::from_level(*level).unwrap_or_default())
            .collect()
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidResumeData {
        reason: reason.to_string(),
    }
}

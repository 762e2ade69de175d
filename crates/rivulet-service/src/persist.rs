//! Sidecar files that let torrents survive a restart.
//!
//! Every write and delete is best effort: failures are logged and swallowed, and a
//! missing file is not an error.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rivulet_torrent_core::InfoHash;
use tracing::{debug, warn};

pub(crate) const TORRENT_EXT: &str = "torrent";
pub(crate) const MAGNET_EXT: &str = "magnet";
pub(crate) const FASTRESUME_EXT: &str = "fastresume";
const PARTS_SUFFIX: &str = ".parts";

/// Sidecar layout: `<hash>.torrent`, `<hash>.magnet` and `<hash>.fastresume` under the
/// torrents directory, `.<hash>.parts` under the download directory.
#[derive(Debug, Clone)]
pub(crate) struct Persistence {
    torrents_dir: PathBuf,
    download_dir: PathBuf,
}

impl Persistence {
    pub(crate) fn new(torrents_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            torrents_dir: torrents_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub(crate) fn sidecar_path(&self, info_hash: &InfoHash, ext: &str) -> PathBuf {
        self.torrents_dir.join(format!("{}.{ext}", info_hash.to_hex()))
    }

    pub(crate) fn parts_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.download_dir
            .join(format!(".{}{PARTS_SUFFIX}", info_hash.to_hex()))
    }

    pub(crate) fn save_torrent(&self, info_hash: &InfoHash, bytes: &[u8]) {
        self.write(&self.sidecar_path(info_hash, TORRENT_EXT), bytes);
    }

    pub(crate) fn save_magnet(&self, info_hash: &InfoHash, uri: &str) {
        self.write(&self.sidecar_path(info_hash, MAGNET_EXT), uri.as_bytes());
    }

    pub(crate) fn save_fastresume(&self, info_hash: &InfoHash, bytes: &[u8]) {
        self.write(&self.sidecar_path(info_hash, FASTRESUME_EXT), bytes);
    }

    pub(crate) fn delete_magnet(&self, info_hash: &InfoHash) {
        remove_file(&self.sidecar_path(info_hash, MAGNET_EXT));
    }

    /// Drop the parts file and every sidecar of a torrent.
    pub(crate) fn delete_all(&self, info_hash: &InfoHash) {
        remove_file(&self.parts_path(info_hash));
        for ext in [FASTRESUME_EXT, TORRENT_EXT, MAGNET_EXT] {
            remove_file(&self.sidecar_path(info_hash, ext));
        }
    }

    /// Sidecars with the given extension, sorted by path.
    pub(crate) fn list(&self, ext: &str) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.torrents_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, path = %self.torrents_dir.display(), "failed to list sidecars");
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|found| found == ext))
            .collect();
        paths.sort();
        paths
    }

    /// Parts files whose torrent is not in `active`.
    pub(crate) fn orphaned_parts(&self, active: &HashSet<InfoHash>) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.download_dir) else {
            return Vec::new();
        };
        let mut orphans: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                parts_hash(path).is_some_and(|info_hash| !active.contains(&info_hash))
            })
            .collect();
        orphans.sort();
        orphans
    }

    fn write(&self, path: &Path, bytes: &[u8]) {
        match fs::write(path, bytes) {
            Ok(()) => debug!(path = %path.display(), "sidecar saved"),
            Err(err) => warn!(error = %err, path = %path.display(), "failed to save sidecar"),
        }
    }
}

/// Info hash named by a `.<hash>.parts` file.
fn parts_hash(path: &Path) -> Option<InfoHash> {
    let name = path.file_name()?.to_str()?;
    let hex = name.strip_prefix('.')?.strip_suffix(PARTS_SUFFIX)?;
    InfoHash::from_hex(hex).ok()
}

/// Info hash named by a `<hash>.<ext>` sidecar.
pub(crate) fn sidecar_hash(path: &Path) -> Option<InfoHash> {
    InfoHash::from_hex(path.file_stem()?.to_str()?).ok()
}

pub(crate) fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "file removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(error = %err, path = %path.display(), "failed to remove file"),
    }
}

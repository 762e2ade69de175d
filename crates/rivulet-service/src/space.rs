//! Free-space lookup for the download volume.

use std::io;
use std::path::Path;

/// Reports the bytes available to unprivileged writers on the volume holding `path`.
pub trait SpaceProbe: Send + Sync {
    /// Free bytes on the volume.
    ///
    /// # Errors
    ///
    /// Returns an error when the volume cannot be queried.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by the operating system's `statvfs`/`GetDiskFreeSpaceEx`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

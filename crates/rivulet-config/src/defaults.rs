//! Default values for settings fields.

pub(crate) const LISTEN_PORT: u16 = 6889;
pub(crate) const DOWNLOAD_PATH: &str = "downloads";
pub(crate) const TORRENTS_PATH: &str = "downloads/Torrents";
/// Seconds between resume-data sweeps.
pub(crate) const SESSION_SAVE_SECS: u64 = 30;
pub(crate) const BUFFER_SIZE: u64 = 20 * 1024 * 1024;
pub(crate) const END_BUFFER_SIZE: u64 = 1024 * 1024;
/// Read-ahead window as a fraction of the file length.
pub(crate) const READ_AHEAD: f64 = 0.01;
/// Seconds a reader waits for a single piece.
pub(crate) const PIECE_WAIT_TIMEOUT_SECS: u64 = 60;
pub(crate) const LOG_LEVEL: &str = "info";

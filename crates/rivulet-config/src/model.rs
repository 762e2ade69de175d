//! Typed settings document.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Peer-connection encryption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionPolicy {
    /// Accept encrypted and plaintext peers.
    #[default]
    Enabled,
    /// Plaintext peers only.
    Disabled,
    /// Encrypted peers only.
    Forced,
}

impl EncryptionPolicy {
    /// Render the policy as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Forced => "forced",
        }
    }
}

/// Daemon settings. Missing fields take their defaults when loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Port peers connect to.
    pub listen_port: u16,
    /// Comma separated listen interfaces; empty listens everywhere.
    pub listen_interfaces: String,
    /// Comma separated outgoing interfaces; empty uses the default route.
    pub outgoing_interfaces: String,
    /// Disable the DHT node.
    pub disable_dht: bool,
    /// Disable `UPnP` and NAT-PMP port mapping.
    pub disable_upnp: bool,
    /// Disable local service discovery.
    pub disable_lsd: bool,
    /// Directory payload is written under.
    pub download_path: PathBuf,
    /// Directory holding `.torrent`, `.magnet` and `.fastresume` sidecars.
    pub torrents_path: PathBuf,
    /// Peer user agent; empty keeps the engine default.
    pub user_agent: String,
    /// Seconds between resume-data sweeps.
    pub session_save: u64,
    /// Maximum peer connections; 0 keeps the engine default.
    pub connections_limit: u32,
    /// Apply the rate caps only once every stream buffer is filled.
    pub limit_after_buffering: bool,
    /// Download cap in bytes per second; 0 is unlimited.
    pub max_download_rate: u64,
    /// Upload cap in bytes per second; 0 is unlimited.
    pub max_upload_rate: u64,
    /// Pause a complete torrent once uploaded/downloaded reaches this percentage; 0 disables.
    pub share_ratio_limit: u32,
    /// Pause a complete torrent once seeding/downloading time reaches this percentage; 0 disables.
    pub seed_time_ratio_limit: u32,
    /// Pause a complete torrent after seeding this many seconds; 0 disables.
    pub seed_time_limit: u64,
    /// Minimum head buffer in bytes when a stream starts.
    pub buffer_size: u64,
    /// Tail buffer in bytes when a stream starts.
    pub end_buffer_size: u64,
    /// Reader read-ahead window as a fraction of the file length.
    pub read_ahead: f64,
    /// Seconds a reader waits for one piece; 0 waits until cancelled.
    pub piece_wait_timeout: u64,
    /// Pause torrents whose remaining payload does not fit on the download volume.
    pub check_available_space: bool,
    /// Peer-connection encryption.
    pub encryption_policy: EncryptionPolicy,
    /// Log level or filter directive.
    pub log_level: String,
    /// File these settings were loaded from and are saved to.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_port: defaults::LISTEN_PORT,
            listen_interfaces: String::new(),
            outgoing_interfaces: String::new(),
            disable_dht: false,
            disable_upnp: false,
            disable_lsd: false,
            download_path: PathBuf::from(defaults::DOWNLOAD_PATH),
            torrents_path: PathBuf::from(defaults::TORRENTS_PATH),
            user_agent: String::new(),
            session_save: defaults::SESSION_SAVE_SECS,
            connections_limit: 0,
            limit_after_buffering: false,
            max_download_rate: 0,
            max_upload_rate: 0,
            share_ratio_limit: 0,
            seed_time_ratio_limit: 0,
            seed_time_limit: 0,
            buffer_size: defaults::BUFFER_SIZE,
            end_buffer_size: defaults::END_BUFFER_SIZE,
            read_ahead: defaults::READ_AHEAD,
            piece_wait_timeout: defaults::PIECE_WAIT_TIMEOUT_SECS,
            check_available_space: true,
            encryption_policy: EncryptionPolicy::default(),
            log_level: defaults::LOG_LEVEL.to_string(),
            path: PathBuf::new(),
        }
    }
}

impl Settings {
    /// Interval between resume-data sweeps.
    #[must_use]
    pub const fn session_save_interval(&self) -> Duration {
        Duration::from_secs(self.session_save)
    }

    /// Budget a reader waits for one piece, `None` when unbounded.
    #[must_use]
    pub const fn piece_wait_timeout(&self) -> Option<Duration> {
        if self.piece_wait_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.piece_wait_timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.listen_port, 6889);
        assert_eq!(settings.download_path, PathBuf::from("downloads"));
        assert_eq!(settings.torrents_path, PathBuf::from("downloads/Torrents"));
        assert_eq!(settings.session_save_interval(), Duration::from_secs(30));
        assert_eq!(settings.buffer_size, 20 * 1024 * 1024);
        assert_eq!(
            settings.piece_wait_timeout(),
            Some(Duration::from_secs(60))
        );
        assert!(settings.check_available_space);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let settings = Settings {
            piece_wait_timeout: 0,
            ..Settings::default()
        };
        assert_eq!(settings.piece_wait_timeout(), None);
        assert_eq!(EncryptionPolicy::Forced.as_str(), "forced");
    }
}

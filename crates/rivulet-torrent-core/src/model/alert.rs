//! Alerts delivered by the engine's session.

use std::ops::BitOr;

use super::{InfoHash, NativeState};

/// Category mask attached to every alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertCategory(u32);

impl AlertCategory {
    /// Failures.
    pub const ERROR: Self = Self(1);
    /// Peer events.
    pub const PEER: Self = Self(1 << 1);
    /// Port mapping (`UPnP`, NAT-PMP).
    pub const PORT_MAPPING: Self = Self(1 << 2);
    /// Disk storage.
    pub const STORAGE: Self = Self(1 << 3);
    /// Tracker announces.
    pub const TRACKER: Self = Self(1 << 4);
    /// Connection lifecycle.
    pub const CONNECT: Self = Self(1 << 5);
    /// Torrent state and status changes.
    pub const STATUS: Self = Self(1 << 6);
    /// IP and address notifications.
    pub const IP_BLOCK: Self = Self(1 << 8);
    /// Performance warnings.
    pub const PERFORMANCE: Self = Self(1 << 9);
    /// DHT activity.
    pub const DHT: Self = Self(1 << 10);

    /// Raw bit mask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether any bit of `other` is set in this mask.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for AlertCategory {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Alert payloads the service reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// Resume data requested through `save_resume_data` is ready.
    ResumeDataReady {
        /// Torrent the data belongs to.
        info_hash: InfoHash,
        /// Encoded resume blob.
        payload: Vec<u8>,
    },
    /// The info dictionary arrived from the swarm.
    MetadataReceived {
        /// Torrent that received metadata.
        info_hash: InfoHash,
    },
    /// The native state of a torrent changed.
    StateChanged {
        /// Torrent whose state changed.
        info_hash: InfoHash,
        /// Previous state.
        previous: NativeState,
        /// New state.
        state: NativeState,
    },
    /// The session learned its external address.
    ExternalAddress,
    /// Anything else; only logged.
    Other {
        /// Engine alert type name.
        what: String,
    },
}

impl AlertKind {
    /// Short alert type name for logs.
    #[must_use]
    pub fn what(&self) -> &str {
        match self {
            Self::ResumeDataReady { .. } => "save_resume_data",
            Self::MetadataReceived { .. } => "metadata_received",
            Self::StateChanged { .. } => "state_changed",
            Self::ExternalAddress => "external_ip",
            Self::Other { what } => what,
        }
    }
}

/// One alert popped from the engine's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Category mask.
    pub category: AlertCategory,
    /// Typed payload.
    pub kind: AlertKind,
    /// Human-readable engine message.
    pub message: String,
}

impl Alert {
    /// Construct an alert.
    #[must_use]
    pub fn new(category: AlertCategory, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            category,
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_masks_combine() {
        let mask = AlertCategory::ERROR | AlertCategory::STORAGE;
        assert!(mask.contains(AlertCategory::ERROR));
        assert!(mask.contains(AlertCategory::STORAGE));
        assert!(!mask.contains(AlertCategory::CONNECT));
        assert_eq!(AlertCategory::default().bits(), 0);
    }

    #[test]
    fn alert_names_are_stable() {
        let kind = AlertKind::Other {
            what: "peer_connect".into(),
        };
        assert_eq!(kind.what(), "peer_connect");
        assert_eq!(AlertKind::ExternalAddress.what(), "external_ip");
    }
}

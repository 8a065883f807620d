//! Device records and presence status

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::address::HardwareAddress;

/// Observed presence of a device.
///
/// Reflects the last reconciled probe outcome, never a raw probe read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Device link is up
    Present,
    /// Device link is down
    Absent,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// One tracked device, keyed by hardware address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Canonical hardware address (unique key)
    pub address: HardwareAddress,
    /// Human-assigned label; unset until registration completes
    pub name: Option<String>,
    /// Current presence status
    pub status: PresenceStatus,
    /// Most recent reconciliation write, whether or not status changed
    pub last_seen: DateTime<Utc>,
    /// Set on absent -> present, cleared on present -> absent
    pub connected_since: Option<DateTime<Utc>>,
    /// First ever observation of this address
    pub first_seen: DateTime<Utc>,
    /// True while the device awaits a human-assigned name
    pub pending_registration: bool,
    /// Deletion deadline; only meaningful while pending
    pub grace_period_end: Option<DateTime<Utc>>,
}

impl Device {
    /// Create an explicitly registered device. Starts absent, no grace
    /// period; presence is established by the next reconciliation cycle.
    pub fn registered(address: HardwareAddress, name: String, now: DateTime<Utc>) -> Self {
        Self {
            address,
            name: Some(name),
            status: PresenceStatus::Absent,
            last_seen: now,
            connected_since: None,
            first_seen: now,
            pending_registration: false,
            grace_period_end: None,
        }
    }

    /// Create a pending device auto-discovered from an unexpected but
    /// connected address. Starts present with a grace deadline.
    pub fn pending(address: HardwareAddress, now: DateTime<Utc>, grace_secs: i64) -> Self {
        Self {
            address,
            name: None,
            status: PresenceStatus::Present,
            last_seen: now,
            connected_since: Some(now),
            first_seen: now,
            pending_registration: true,
            grace_period_end: Some(now + Duration::seconds(grace_secs)),
        }
    }

    /// Display label for logs and the change feed
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("[pending] {}", self.address),
        }
    }

    /// Whether this device is eligible for deletion by the expiry sweep.
    /// Registered devices and pending devices that are still present are
    /// never eligible, regardless of deadline.
    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        self.pending_registration
            && self.status == PresenceStatus::Absent
            && self.grace_period_end.is_some_and(|end| now > end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> HardwareAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_registered_device_starts_absent() {
        let now = Utc::now();
        let device = Device::registered(addr(), "Alice's Phone".to_string(), now);
        assert_eq!(device.status, PresenceStatus::Absent);
        assert!(!device.pending_registration);
        assert!(device.grace_period_end.is_none());
        assert!(device.connected_since.is_none());
    }

    #[test]
    fn test_pending_device_starts_present_with_deadline() {
        let now = Utc::now();
        let device = Device::pending(addr(), now, 300);
        assert_eq!(device.status, PresenceStatus::Present);
        assert!(device.pending_registration);
        assert!(device.name.is_none());
        assert_eq!(device.grace_period_end, Some(now + Duration::seconds(300)));
        assert_eq!(device.connected_since, Some(now));
    }

    #[test]
    fn test_grace_expired_requires_pending_absent_and_past_deadline() {
        let now = Utc::now();
        let mut device = Device::pending(addr(), now, 300);

        // Present past deadline: not eligible
        assert!(!device.grace_expired(now + Duration::seconds(301)));

        // Absent but before deadline: not eligible
        device.status = PresenceStatus::Absent;
        assert!(!device.grace_expired(now + Duration::seconds(299)));

        // Absent past deadline: eligible
        assert!(device.grace_expired(now + Duration::seconds(301)));

        // Registered devices are never eligible
        device.pending_registration = false;
        assert!(!device.grace_expired(now + Duration::seconds(301)));
    }

    #[test]
    fn test_display_name() {
        let now = Utc::now();
        let pending = Device::pending(addr(), now, 300);
        assert_eq!(pending.display_name(), "[pending] AA:BB:CC:DD:EE:FF");

        let named = Device::registered(addr(), "Desk Speaker".to_string(), now);
        assert_eq!(named.display_name(), "Desk Speaker");
    }
}

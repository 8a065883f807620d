//! Presence events for real-time consumers

use tether_core::{Device, HardwareAddress, PresenceStatus};

/// Event broadcast after the corresponding change record is durable.
/// Delivery and formatting are the consumer's concern; the engine only
/// guarantees ordering per device.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// Unknown connected device auto-registered as pending
    DevicePending(Device),
    /// Device explicitly registered
    DeviceRegistered(Device),
    /// Presence transition (absent <-> present)
    PresenceChanged {
        device: Device,
        from: PresenceStatus,
        to: PresenceStatus,
    },
    /// Pending device deleted by the grace-period sweep
    DeviceExpired(HardwareAddress),
    /// Device removed administratively
    DeviceRemoved(HardwareAddress),
    /// Reconciliation cycle finished
    CycleCompleted {
        probed: usize,
        changed: usize,
        pending_created: usize,
        failed: usize,
    },
}

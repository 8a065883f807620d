//! Tether Probe - the link-status boundary
//!
//! Defines the [`LinkProber`] trait the reconciliation engine polls
//! through, and a BlueZ-backed implementation that shells out to
//! `bluetoothctl`. The prober is treated as flaky and slow: every call
//! can fail, and a failure means "unknown this cycle", never "absent".

pub mod bluez;

use async_trait::async_trait;
use tether_core::HardwareAddress;
use thiserror::Error;

pub use bluez::BluetoothCtlProber;

/// Probe failure taxonomy. The engine treats every kind identically
/// (skip the device this cycle); the kinds exist for logging.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("probe timed out after {0}ms")]
    Timeout(u64),
    #[error("device {0} is not paired")]
    NotPaired(HardwareAddress),
    #[error("probe io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Link-status probe for paired short-range wireless devices
#[async_trait]
pub trait LinkProber: Send + Sync {
    /// Is this device currently connected?
    async fn probe(&self, address: &HardwareAddress) -> Result<bool, ProbeError>;

    /// Enumerate currently connected devices, with the advertised name
    /// when one is available. Used to spot unknown devices that should
    /// enter pending registration.
    async fn connected_devices(
        &self,
    ) -> Result<Vec<(HardwareAddress, Option<String>)>, ProbeError>;

    /// Drop the pairing for a device. Best-effort cleanup after an
    /// expired pending device is deleted.
    async fn remove_pairing(&self, address: &HardwareAddress) -> Result<(), ProbeError>;
}

//! `bluetoothctl`-backed link prober
//!
//! Each call shells out to the BlueZ CLI with a hard timeout. Output
//! parsing is line-based; `bluetoothctl` is stable enough across BlueZ
//! releases for the fields used here (`Connected:`, `Device <MAC>`).

use async_trait::async_trait;
use std::time::Duration;
use tether_core::HardwareAddress;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::{LinkProber, ProbeError};

/// Default per-call timeout in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;

/// Link prober backed by the `bluetoothctl` CLI
pub struct BluetoothCtlProber {
    binary: String,
    timeout_ms: u64,
}

impl BluetoothCtlProber {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            binary: "bluetoothctl".to_string(),
            timeout_ms,
        }
    }

    /// Override the binary path (tests, non-standard installs)
    pub fn with_binary(binary: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_ms,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ProbeError> {
        let result = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            Command::new(&self.binary).args(args).output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::AdapterUnavailable(format!(
                    "{} not found",
                    self.binary
                )));
            }
            Ok(Err(e)) => return Err(ProbeError::Io(e)),
            Err(_) => return Err(ProbeError::Timeout(self.timeout_ms)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            trace!(args = ?args, %stderr, "bluetoothctl exited non-zero");
        }
        Ok(stdout)
    }
}

impl Default for BluetoothCtlProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT_MS)
    }
}

#[async_trait]
impl LinkProber for BluetoothCtlProber {
    async fn probe(&self, address: &HardwareAddress) -> Result<bool, ProbeError> {
        let stdout = self.run(&["info", address.as_str()]).await?;

        if stdout.contains("not available") || stdout.contains("No default controller") {
            return Err(ProbeError::NotPaired(address.clone()));
        }

        let connected = parse_connected(&stdout);
        debug!(address = %address, connected, "Probed device");
        Ok(connected)
    }

    async fn connected_devices(
        &self,
    ) -> Result<Vec<(HardwareAddress, Option<String>)>, ProbeError> {
        let stdout = self.run(&["devices", "Connected"]).await?;
        if stdout.contains("No default controller") {
            return Err(ProbeError::AdapterUnavailable(
                "no default controller".to_string(),
            ));
        }
        Ok(parse_device_list(&stdout))
    }

    async fn remove_pairing(&self, address: &HardwareAddress) -> Result<(), ProbeError> {
        let stdout = self.run(&["remove", address.as_str()]).await?;
        if stdout.contains("not available") {
            warn!(address = %address, "Remove requested for unknown device");
            return Err(ProbeError::NotPaired(address.clone()));
        }
        debug!(address = %address, "Removed pairing");
        Ok(())
    }
}

/// Parse the `Connected: yes/no` line from `bluetoothctl info` output
fn parse_connected(output: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .any(|line| line.eq_ignore_ascii_case("Connected: yes"))
}

/// Parse `bluetoothctl devices ...` output lines of the form
/// `Device AA:BB:CC:DD:EE:FF Some Name`
fn parse_device_list(output: &str) -> Vec<(HardwareAddress, Option<String>)> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Device ") else {
            continue;
        };
        let (addr_str, name) = match rest.split_once(' ') {
            Some((a, n)) => (a, Some(n.trim().to_string()).filter(|s| !s.is_empty())),
            None => (rest, None),
        };
        match addr_str.parse::<HardwareAddress>() {
            Ok(address) => devices.push((address, name)),
            Err(e) => trace!(line, error = %e, "Skipping unparseable device line"),
        }
    }
    devices
}

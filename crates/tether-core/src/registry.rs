//! Device registry with per-address atomic upserts
//!
//! The registry is the only shared mutable resource in the system. All
//! mutation is a single read-modify-write under the write lock, so every
//! operation is atomic per hardware address and the expiry predicate can
//! be re-checked at delete time. State is snapshotted to a JSON file
//! after each mutation and loaded at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::address::HardwareAddress;
use crate::changelog::{ChangeRecord, ChangeType};
use crate::device::{Device, PresenceStatus};

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no device registered for {0}")]
    NotFound(HardwareAddress),
    #[error("device {0} is not pending registration")]
    NotPending(HardwareAddress),
    #[error("failed to persist registry: {0}")]
    Persist(#[from] std::io::Error),
    #[error("failed to encode registry snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a conditional status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// Status actually changed; one StatusChange record was appended
    Transitioned {
        from: PresenceStatus,
        to: PresenceStatus,
    },
    /// Stored status already matched the target; last_seen-only update
    Unchanged,
    /// No record for this address (e.g. deleted by the sweep mid-cycle);
    /// the write degrades to a no-op rather than resurrecting the record
    Missing,
}

/// On-disk snapshot shape
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    devices: Vec<Device>,
    changes: Vec<ChangeRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<HardwareAddress, Device>,
    changes: Vec<ChangeRecord>,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
        Snapshot {
            devices,
            changes: self.changes.clone(),
        }
    }
}

/// Device registry keyed by hardware address
pub struct Registry {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl Registry {
    /// Create an in-memory registry with no persistence
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            path: None,
        }
    }

    /// Open a registry backed by a JSON snapshot file. Missing or
    /// unreadable files start an empty registry.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Snapshot>(&content) {
                Ok(snapshot) => {
                    info!(
                        path = %path.display(),
                        devices = snapshot.devices.len(),
                        changes = snapshot.changes.len(),
                        "Loaded registry"
                    );
                    Inner {
                        devices: snapshot
                            .devices
                            .into_iter()
                            .map(|d| (d.address.clone(), d))
                            .collect(),
                        changes: snapshot.changes,
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse registry, starting empty");
                    Inner::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Registry file not found, starting empty");
                Inner::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read registry, starting empty");
                Inner::default()
            }
        };

        Self {
            inner: RwLock::new(inner),
            path: Some(path),
        }
    }

    /// Write the snapshot file. Called with the state captured under the
    /// write lock so on-disk ordering matches insertion order. The write
    /// goes to a sibling temp file and renames into place; a partial
    /// write never replaces the previous snapshot.
    fn persist(&self, snapshot: &Snapshot) -> Result<(), RegistryError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(snapshot)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, path)?;
        }
        Ok(())
    }

    /// List all devices, ordered by address
    pub async fn list_devices(&self) -> Vec<Device> {
        let inner = self.inner.read().await;
        let mut devices: Vec<Device> = inner.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
        devices
    }

    /// Look up one device
    pub async fn find_by_address(&self, address: &HardwareAddress) -> Option<Device> {
        self.inner.read().await.devices.get(address).cloned()
    }

    /// Explicit registration: create-if-absent. An existing record is
    /// returned unchanged, no duplicate and no name overwrite. Returns
    /// the record and whether it was created by this call.
    pub async fn register(
        &self,
        address: HardwareAddress,
        name: String,
    ) -> Result<(Device, bool), RegistryError> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.devices.get(&address) {
            debug!(address = %address, "Register on existing device, returning unchanged");
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let device = Device::registered(address.clone(), name, now);
        inner.devices.insert(address.clone(), device.clone());
        inner.changes.push(ChangeRecord::new(
            address,
            ChangeType::Create,
            now,
            format!("registered as \"{}\"", device.display_name()),
        ));

        let snapshot = inner.snapshot();
        drop(inner);
        self.persist(&snapshot)?;
        Ok((device, true))
    }

    /// Pending (auto) registration of a connected but unknown address.
    /// If a record already exists the call degrades to a present-status
    /// update instead of inserting a duplicate.
    pub async fn register_pending(
        &self,
        address: HardwareAddress,
        grace_secs: i64,
    ) -> Result<(Device, bool), RegistryError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(device) = inner.devices.get_mut(&address) {
            // Degrade to a present-status update under the same lock
            device.last_seen = now;
            let transitioned = device.status != PresenceStatus::Present;
            if transitioned {
                device.status = PresenceStatus::Present;
                device.connected_since = Some(now);
            }
            let device = device.clone();
            if transitioned {
                inner.changes.push(ChangeRecord::new(
                    address.clone(),
                    ChangeType::StatusChange,
                    now,
                    "absent -> present",
                ));
            }
            let snapshot = inner.snapshot();
            drop(inner);
            self.persist(&snapshot)?;
            debug!(address = %address, "Pending registration degraded to status update");
            return Ok((device, false));
        }

        let device = Device::pending(address.clone(), now, grace_secs);
        inner.devices.insert(address.clone(), device.clone());
        inner.changes.push(ChangeRecord::new(
            address.clone(),
            ChangeType::Create,
            now,
            "auto-registered pending device".to_string(),
        ));

        let snapshot = inner.snapshot();
        drop(inner);
        self.persist(&snapshot)?;
        info!(address = %device.address, "Registered pending device");
        Ok((device, true))
    }

    /// Complete a pending registration: assign the name and clear the
    /// pending flag. Fails with NotFound if no record exists; completion
    /// cannot create. Fails with NotPending on an already-registered
    /// device, whose name only the explicit registration path owns.
    pub async fn complete_registration(
        &self,
        address: &HardwareAddress,
        name: String,
    ) -> Result<Device, RegistryError> {
        let mut inner = self.inner.write().await;

        let device = inner
            .devices
            .get_mut(address)
            .ok_or_else(|| RegistryError::NotFound(address.clone()))?;
        if !device.pending_registration {
            return Err(RegistryError::NotPending(address.clone()));
        }

        device.name = Some(name.clone());
        device.pending_registration = false;
        let device = device.clone();

        inner.changes.push(ChangeRecord::new(
            address.clone(),
            ChangeType::Update,
            Utc::now(),
            format!("registration completed as \"{name}\""),
        ));

        let snapshot = inner.snapshot();
        drop(inner);
        self.persist(&snapshot)?;
        info!(address = %device.address, name = %name, "Registration completed");
        Ok(device)
    }

    /// Conditional status write. The transition is decided against the
    /// stored status under the write lock, so two overlapping cycles
    /// reconciling the same device produce at most one StatusChange
    /// record for one logical transition.
    pub async fn update_status(
        &self,
        address: &HardwareAddress,
        observed: PresenceStatus,
    ) -> Result<StatusWrite, RegistryError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let Some(device) = inner.devices.get_mut(address) else {
            return Ok(StatusWrite::Missing);
        };

        let prior = device.status;
        device.last_seen = now;

        if prior == observed {
            let snapshot = inner.snapshot();
            drop(inner);
            self.persist(&snapshot)?;
            return Ok(StatusWrite::Unchanged);
        }

        device.status = observed;
        device.connected_since = match observed {
            PresenceStatus::Present => Some(now),
            PresenceStatus::Absent => None,
        };
        let device_name = device.display_name();

        inner.changes.push(ChangeRecord::new(
            address.clone(),
            ChangeType::StatusChange,
            now,
            format!("{prior} -> {observed}"),
        ));

        let snapshot = inner.snapshot();
        drop(inner);
        self.persist(&snapshot)?;
        info!(address = %address, device = %device_name, from = %prior, to = %observed, "Status changed");
        Ok(StatusWrite::Transitioned {
            from: prior,
            to: observed,
        })
    }

    /// Administrative delete. Returns the removed device, if any.
    pub async fn remove(
        &self,
        address: &HardwareAddress,
    ) -> Result<Option<Device>, RegistryError> {
        let mut inner = self.inner.write().await;
        let removed = inner.devices.remove(address);
        if removed.is_some() {
            let snapshot = inner.snapshot();
            drop(inner);
            self.persist(&snapshot)?;
            info!(address = %address, "Device removed from registry");
        }
        Ok(removed)
    }

    /// Delete every pending device that is absent and past its grace
    /// deadline. The predicate is evaluated here, under the write lock,
    /// not at some earlier scan time, so an in-flight status update can
    /// never race a deletion back to life. Expired pending devices never
    /// completed registration, so no change record is written.
    pub async fn expire_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<HardwareAddress>, RegistryError> {
        let mut inner = self.inner.write().await;

        let expired: Vec<HardwareAddress> = inner
            .devices
            .values()
            .filter(|d| d.grace_expired(now))
            .map(|d| d.address.clone())
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        for address in &expired {
            inner.devices.remove(address);
        }

        let snapshot = inner.snapshot();
        drop(inner);
        self.persist(&snapshot)?;
        info!(count = expired.len(), "Expired pending devices deleted");
        Ok(expired)
    }

    /// Change log, newest first. Ties keep insertion order.
    pub async fn list_changes(&self) -> Vec<ChangeRecord> {
        let inner = self.inner.read().await;
        let mut changes = inner.changes.clone();
        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        changes
    }

    /// Purge change records older than the cutoff. Returns the number
    /// of records removed.
    pub async fn purge_changes_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RegistryError> {
        let mut inner = self.inner.write().await;
        let before = inner.changes.len();
        inner.changes.retain(|c| c.timestamp >= cutoff);
        let purged = before - inner.changes.len();

        if purged > 0 {
            let snapshot = inner.snapshot();
            drop(inner);
            self.persist(&snapshot)?;
            debug!(purged, "Purged old change records");
        }
        Ok(purged)
    }
}

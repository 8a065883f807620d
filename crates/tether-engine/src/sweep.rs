//! Periodic sweeps: grace-period expiry and change-log retention
//!
//! Both run on their own timers, independent of the polling cycle. The
//! expiry predicate lives in the registry and is re-checked under the
//! write lock, so a sweep can safely overlap an in-flight cycle.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::{HardwareAddress, Registry};
use tether_probe::LinkProber;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::events::PresenceEvent;
use crate::reconciler::{Reconciler, ReconcilerConfig};

/// Runs the expiry and retention sweeps
pub struct Sweeper {
    registry: Arc<Registry>,
    prober: Arc<dyn LinkProber>,
    config: ReconcilerConfig,
    event_tx: broadcast::Sender<PresenceEvent>,
    failures: Arc<Mutex<HashMap<HardwareAddress, u32>>>,
}

impl Sweeper {
    /// Build a sweeper sharing the reconciler's registry, prober, event
    /// channel, and failure-streak map.
    pub fn from_reconciler(reconciler: &Reconciler) -> Self {
        Self {
            registry: reconciler.registry().clone(),
            prober: reconciler.prober().clone(),
            config: reconciler.config().clone(),
            event_tx: reconciler.event_sender(),
            failures: reconciler.failure_streaks(),
        }
    }

    /// Delete pending devices that are absent and past their grace
    /// deadline, then drop their Bluetooth pairing (best-effort). They
    /// never completed registration, so no change record is written.
    /// Returns the number of deletions.
    pub async fn expire_once(&self) -> Result<usize> {
        let expired = self.registry.expire_pending(Utc::now()).await?;

        if !expired.is_empty() {
            // Deleted devices take their failure streaks with them
            let mut failures = self.failures.lock().await;
            for address in &expired {
                failures.remove(address);
            }
        }

        for address in &expired {
            if let Err(e) = self.prober.remove_pairing(address).await {
                warn!(address = %address, error = %e, "Failed to remove pairing for expired device");
            }
            let _ = self
                .event_tx
                .send(PresenceEvent::DeviceExpired(address.clone()));
        }

        if expired.is_empty() {
            debug!("No expired grace periods");
        } else {
            info!(count = expired.len(), "Grace-period sweep deleted devices");
        }
        Ok(expired.len())
    }

    /// Purge change records older than the retention window
    pub async fn purge_changes_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.change_retention_secs);
        let purged = self.registry.purge_changes_before(cutoff).await?;
        if purged > 0 {
            info!(purged, "Change-log retention sweep");
        }
        Ok(purged)
    }

    /// Run both sweeps until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut expiry = interval(Duration::from_secs(self.config.sweep_interval_secs));
        let mut retention = interval(Duration::from_secs(self.config.change_purge_interval_secs));
        info!(
            expiry_secs = self.config.sweep_interval_secs,
            retention_secs = self.config.change_purge_interval_secs,
            "Sweeper started"
        );

        loop {
            tokio::select! {
                _ = expiry.tick() => {
                    if let Err(e) = self.expire_once().await {
                        warn!(error = %e, "Grace-period sweep failed");
                    }
                }
                _ = retention.tick() => {
                    if let Err(e) = self.purge_changes_once().await {
                        warn!(error = %e, "Change-log retention sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Sweeper shutting down");
                    return Ok(());
                }
            }
        }
    }
}

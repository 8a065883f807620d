//! Reconciliation cycle driver and per-device state machine

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tether_core::{Device, HardwareAddress, PresenceStatus, Registry, StatusWrite};
use tether_probe::LinkProber;
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::events::PresenceEvent;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Reconciliation cycle interval in seconds
    pub poll_interval_secs: u64,
    /// Grace-period expiry sweep interval in seconds
    pub sweep_interval_secs: u64,
    /// Grace period granted to pending devices in seconds
    pub grace_period_secs: i64,
    /// Max concurrent probes per cycle (bounds load on the radio stack)
    pub probe_concurrency: usize,
    /// Consecutive probe failures after which a present device is
    /// forced absent. None retains the last known status indefinitely.
    pub absent_after_failures: Option<u32>,
    /// Change records older than this are purged
    pub change_retention_secs: i64,
    /// Change-log retention sweep interval in seconds
    pub change_purge_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            sweep_interval_secs: 30,
            grace_period_secs: 300,
            probe_concurrency: 4,
            absent_after_failures: Some(10),
            change_retention_secs: 7 * 24 * 3600,
            change_purge_interval_secs: 3600,
        }
    }
}

/// What one cycle did, for the summary log and tests
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    /// Devices probed this cycle
    pub probed: usize,
    /// Probes that failed (device skipped, no transition)
    pub failed: usize,
    /// Real status transitions written
    pub changed: usize,
    /// Unknown connected devices registered as pending
    pub pending_created: usize,
    /// Present devices forced absent by the failure budget
    pub forced_absent: usize,
}

/// Presence reconciliation engine
pub struct Reconciler {
    registry: Arc<Registry>,
    prober: Arc<dyn LinkProber>,
    config: ReconcilerConfig,
    event_tx: broadcast::Sender<PresenceEvent>,
    /// Consecutive probe failures per address. Reset on any success and
    /// dropped when the device leaves the registry, so a re-registered
    /// address starts from zero.
    failures: Arc<Mutex<HashMap<HardwareAddress, u32>>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        prober: Arc<dyn LinkProber>,
        config: ReconcilerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            registry,
            prober,
            config,
            event_tx,
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn prober(&self) -> &Arc<dyn LinkProber> {
        &self.prober
    }

    /// Subscribe to presence events
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_tx.subscribe()
    }

    /// Event sender handle, shared with the sweeper and the admin surface
    pub fn event_sender(&self) -> broadcast::Sender<PresenceEvent> {
        self.event_tx.clone()
    }

    /// Drop the consecutive-failure streak for an address. Callers that
    /// delete a device must clear its streak too, or a re-registration
    /// under the same address would inherit it.
    pub async fn clear_failure_streak(&self, address: &HardwareAddress) {
        self.failures.lock().await.remove(address);
    }

    pub(crate) fn failure_streaks(&self) -> Arc<Mutex<HashMap<HardwareAddress, u32>>> {
        self.failures.clone()
    }

    /// Run one full reconciliation cycle: discover unknown connected
    /// devices, then probe every known device once.
    pub async fn cycle_once(&self) -> Result<CycleSummary> {
        let start = Instant::now();
        let mut summary = CycleSummary::default();

        // Step 1: enumerate connected devices and branch explicitly on
        // lookup: unknown -> create pending, known -> left to the probe
        // pass below.
        match self.prober.connected_devices().await {
            Ok(connected) => {
                for (address, name) in connected {
                    if self.registry.find_by_address(&address).await.is_some() {
                        continue;
                    }
                    let (device, created) = self
                        .registry
                        .register_pending(address.clone(), self.config.grace_period_secs)
                        .await?;
                    if created {
                        info!(
                            address = %address,
                            name = name.as_deref().unwrap_or("unknown"),
                            "New connected device, registered as pending"
                        );
                        summary.pending_created += 1;
                        let _ = self.event_tx.send(PresenceEvent::DevicePending(device));
                    }
                }
            }
            Err(e) => {
                // Discovery of unknown devices is skipped this cycle;
                // known devices are still probed individually.
                debug!(error = %e, "Connected-device enumeration failed");
            }
        }

        // Step 2: probe all known devices concurrently, bounded by the
        // worker pool. One probe per address per cycle.
        let known = self.registry.list_devices().await;
        let outcomes = self.probe_all(&known).await;
        summary.probed = outcomes.len();

        // Step 3: fold probe outcomes through the state machine.
        for (device, outcome) in outcomes {
            match outcome {
                Ok(connected) => {
                    self.failures.lock().await.remove(&device.address);
                    let observed = if connected {
                        PresenceStatus::Present
                    } else {
                        PresenceStatus::Absent
                    };
                    if self.apply_status(&device.address, observed).await? {
                        summary.changed += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let streak = {
                        let mut failures = self.failures.lock().await;
                        let streak = failures.entry(device.address.clone()).or_insert(0);
                        *streak += 1;
                        *streak
                    };
                    debug!(
                        address = %device.address,
                        error = %e,
                        streak,
                        "Probe failed, skipping device this cycle"
                    );

                    // A transient failure never flaps a device, but an
                    // exhausted failure budget forces a present device
                    // absent through the same conditional write path.
                    if let Some(budget) = self.config.absent_after_failures {
                        if streak >= budget && device.status == PresenceStatus::Present {
                            warn!(
                                address = %device.address,
                                streak,
                                "Probe failure budget exhausted, forcing absent"
                            );
                            if self
                                .apply_status(&device.address, PresenceStatus::Absent)
                                .await?
                            {
                                summary.changed += 1;
                                summary.forced_absent += 1;
                            }
                        }
                    }
                }
            }
        }

        info!(
            probed = summary.probed,
            failed = summary.failed,
            changed = summary.changed,
            pending_created = summary.pending_created,
            forced_absent = summary.forced_absent,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reconciliation cycle complete"
        );
        let _ = self.event_tx.send(PresenceEvent::CycleCompleted {
            probed: summary.probed,
            changed: summary.changed,
            pending_created: summary.pending_created,
            failed: summary.failed,
        });

        Ok(summary)
    }

    /// Probe every known device once, at most `probe_concurrency` in
    /// flight. Device keys come from the registry map, so the same
    /// address is never probed twice within a cycle.
    async fn probe_all(
        &self,
        known: &[Device],
    ) -> Vec<(Device, Result<bool, tether_probe::ProbeError>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for device in known {
            let prober = self.prober.clone();
            let semaphore = semaphore.clone();
            let device = device.clone();
            tasks.spawn(async move {
                // Holds a permit for the whole probe call
                let _permit = semaphore.acquire_owned().await;
                let outcome = prober.probe(&device.address).await;
                (device, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(known.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Probe task panicked"),
            }
        }
        outcomes
    }

    /// Write one observed status through the conditional path. Returns
    /// true when a real transition was recorded.
    async fn apply_status(
        &self,
        address: &HardwareAddress,
        observed: PresenceStatus,
    ) -> Result<bool> {
        match self.registry.update_status(address, observed).await? {
            StatusWrite::Transitioned { from, to } => {
                if let Some(device) = self.registry.find_by_address(address).await {
                    let _ = self
                        .event_tx
                        .send(PresenceEvent::PresenceChanged { device, from, to });
                }
                Ok(true)
            }
            StatusWrite::Unchanged => Ok(false),
            StatusWrite::Missing => {
                // Deleted by the sweep between listing and writing; the
                // conditional write refuses to resurrect it, and its
                // streak goes with it.
                self.failures.lock().await.remove(address);
                debug!(address = %address, "Device vanished mid-cycle, write skipped");
                Ok(false)
            }
        }
    }

    /// Run the cycle driver until shutdown. A new cycle never starts
    /// before the previous one has fully completed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs));
        info!(
            interval_secs = self.config.poll_interval_secs,
            concurrency = self.config.probe_concurrency,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle_once().await {
                        warn!(error = %e, "Reconciliation cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Reconciler shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tether_core::ChangeType;
    use tether_probe::ProbeError;

    /// Prober scripted per address: each probe pops the next outcome,
    /// repeating the last one once the script is exhausted.
    #[derive(Default)]
    struct ScriptedProber {
        scripts: Mutex<HashMap<HardwareAddress, VecDeque<Result<bool, ()>>>>,
        connected: Mutex<Vec<(HardwareAddress, Option<String>)>>,
        removed: Mutex<Vec<HardwareAddress>>,
    }

    impl ScriptedProber {
        async fn script(&self, address: &HardwareAddress, outcomes: Vec<Result<bool, ()>>) {
            self.scripts
                .lock()
                .await
                .insert(address.clone(), outcomes.into());
        }

        async fn set_connected(&self, devices: Vec<(HardwareAddress, Option<String>)>) {
            *self.connected.lock().await = devices;
        }
    }

    #[async_trait]
    impl LinkProber for ScriptedProber {
        async fn probe(&self, address: &HardwareAddress) -> Result<bool, ProbeError> {
            let mut scripts = self.scripts.lock().await;
            let script = scripts.entry(address.clone()).or_default();
            let outcome = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().unwrap_or(&Err(()))
            };
            outcome.map_err(|_| ProbeError::Timeout(0))
        }

        async fn connected_devices(
            &self,
        ) -> Result<Vec<(HardwareAddress, Option<String>)>, ProbeError> {
            Ok(self.connected.lock().await.clone())
        }

        async fn remove_pairing(&self, address: &HardwareAddress) -> Result<(), ProbeError> {
            self.removed.lock().await.push(address.clone());
            Ok(())
        }
    }

    fn addr(s: &str) -> HardwareAddress {
        s.parse().unwrap()
    }

    fn engine(config: ReconcilerConfig) -> (Arc<Reconciler>, Arc<Registry>, Arc<ScriptedProber>) {
        let registry = Arc::new(Registry::in_memory());
        let prober = Arc::new(ScriptedProber::default());
        let reconciler = Arc::new(Reconciler::new(registry.clone(), prober.clone(), config));
        (reconciler, registry, prober)
    }

    #[tokio::test]
    async fn test_unknown_connected_device_becomes_pending() {
        let (reconciler, registry, prober) = engine(ReconcilerConfig::default());
        let a = addr("AA:BB:CC:DD:EE:FF");
        prober
            .set_connected(vec![(a.clone(), Some("Pixel 9".to_string()))])
            .await;
        prober.script(&a, vec![Ok(true)]).await;

        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.pending_created, 1);

        let device = registry.find_by_address(&a).await.unwrap();
        assert!(device.pending_registration);
        assert_eq!(device.status, PresenceStatus::Present);
        let end = device.grace_period_end.unwrap();
        assert_eq!(end, device.first_seen + chrono::Duration::seconds(300));

        // Second cycle: still connected, no duplicate
        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.pending_created, 0);
        assert_eq!(registry.list_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_follows_last_non_failed_probe() {
        let (reconciler, registry, prober) = engine(ReconcilerConfig::default());
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "Alice's Phone".to_string())
            .await
            .unwrap();
        prober
            .script(&a, vec![Ok(true), Ok(false), Err(()), Ok(true)])
            .await;

        reconciler.cycle_once().await.unwrap();
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Present
        );
        assert!(registry
            .find_by_address(&a)
            .await
            .unwrap()
            .connected_since
            .is_some());

        reconciler.cycle_once().await.unwrap();
        let device = registry.find_by_address(&a).await.unwrap();
        assert_eq!(device.status, PresenceStatus::Absent);
        assert!(device.connected_since.is_none());

        // Failed probe: status retained, not flapped
        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Absent
        );

        reconciler.cycle_once().await.unwrap();
        let device = registry.find_by_address(&a).await.unwrap();
        assert_eq!(device.status, PresenceStatus::Present);
        assert!(device.connected_since.is_some());
    }

    #[tokio::test]
    async fn test_registered_device_going_present_logs_one_change() {
        let (reconciler, registry, prober) = engine(ReconcilerConfig::default());
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "Alice's Phone".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true)]).await;

        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.changed, 1);

        let device = registry.find_by_address(&a).await.unwrap();
        assert!(!device.pending_registration);
        assert_eq!(device.status, PresenceStatus::Present);
        assert!(device.connected_since.is_some());

        let status_changes = registry
            .list_changes()
            .await
            .into_iter()
            .filter(|c| c.change_type == ChangeType::StatusChange)
            .count();
        assert_eq!(status_changes, 1);

        // Repeat cycles while still connected add no records
        reconciler.cycle_once().await.unwrap();
        reconciler.cycle_once().await.unwrap();
        let status_changes = registry
            .list_changes()
            .await
            .into_iter()
            .filter(|c| c.change_type == ChangeType::StatusChange)
            .count();
        assert_eq!(status_changes, 1);
    }

    #[tokio::test]
    async fn test_failure_budget_forces_absent() {
        let config = ReconcilerConfig {
            absent_after_failures: Some(3),
            ..Default::default()
        };
        let (reconciler, registry, prober) = engine(config);
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "Flaky".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true), Err(())]).await;

        reconciler.cycle_once().await.unwrap();
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Present
        );

        // Two failures: still present
        reconciler.cycle_once().await.unwrap();
        reconciler.cycle_once().await.unwrap();
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Present
        );

        // Third consecutive failure exhausts the budget
        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.forced_absent, 1);
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Absent
        );
    }

    #[tokio::test]
    async fn test_forgotten_device_restarts_failure_streak() {
        let config = ReconcilerConfig {
            absent_after_failures: Some(2),
            ..Default::default()
        };
        let (reconciler, registry, prober) = engine(config);
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "First".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true), Err(())]).await;

        reconciler.cycle_once().await.unwrap();
        // One failure banked against the old record
        reconciler.cycle_once().await.unwrap();

        // Forgotten, then re-registered under the same address
        registry.remove(&a).await.unwrap();
        reconciler.clear_failure_streak(&a).await;
        registry
            .register(a.clone(), "Second".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true), Err(())]).await;

        reconciler.cycle_once().await.unwrap();
        // First failure on the new record must not exhaust the budget
        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.forced_absent, 0);
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Present
        );

        // The second consecutive failure does
        let summary = reconciler.cycle_once().await.unwrap();
        assert_eq!(summary.forced_absent, 1);
    }

    #[tokio::test]
    async fn test_failure_budget_disabled_retains_present() {
        let config = ReconcilerConfig {
            absent_after_failures: None,
            ..Default::default()
        };
        let (reconciler, registry, prober) = engine(config);
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "Sticky".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true), Err(())]).await;

        reconciler.cycle_once().await.unwrap();
        for _ in 0..20 {
            reconciler.cycle_once().await.unwrap();
        }
        assert_eq!(
            registry.find_by_address(&a).await.unwrap().status,
            PresenceStatus::Present
        );
    }

    #[tokio::test]
    async fn test_presence_events_emitted() {
        let (reconciler, registry, prober) = engine(ReconcilerConfig::default());
        let mut events = reconciler.subscribe();
        let a = addr("11:22:33:44:55:66");
        registry
            .register(a.clone(), "Alice's Phone".to_string())
            .await
            .unwrap();
        prober.script(&a, vec![Ok(true)]).await;

        reconciler.cycle_once().await.unwrap();

        let event = events.recv().await.unwrap();
        match event {
            PresenceEvent::PresenceChanged { device, from, to } => {
                assert_eq!(device.address, a);
                assert_eq!(from, PresenceStatus::Absent);
                assert_eq!(to, PresenceStatus::Present);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

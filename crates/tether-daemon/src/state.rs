//! Application state management

use anyhow::Result;
use std::sync::Arc;
use tether_core::Registry;
use tether_engine::{PresenceEvent, Reconciler, Sweeper};
use tether_probe::{BluetoothCtlProber, LinkProber};
use tokio::sync::broadcast;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Device registry
    pub registry: Arc<Registry>,
    /// Link prober (shared with the engine)
    pub prober: Arc<dyn LinkProber>,
    /// Reconciliation engine
    pub reconciler: Arc<Reconciler>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let registry = Arc::new(Registry::open(&config.registry.path));
        let prober: Arc<dyn LinkProber> = Arc::new(BluetoothCtlProber::with_binary(
            config.probe.binary.clone(),
            config.probe.timeout_ms,
        ));

        let reconciler = Arc::new(Reconciler::new(
            registry.clone(),
            prober.clone(),
            config.engine.clone(),
        ));

        Ok(Arc::new(Self {
            registry,
            prober,
            reconciler,
            config,
        }))
    }

    /// Subscribe to presence events
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.reconciler.subscribe()
    }

    /// Build a sweeper sharing the engine's registry and event channel
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::from_reconciler(&self.reconciler)
    }
}

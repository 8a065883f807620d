//! Tether Engine - presence reconciliation
//!
//! The engine polls per-device connectivity through the link prober,
//! drives the absent/present state machine for every known device,
//! auto-registers unknown connected devices as pending, and runs the
//! grace-period expiry and change-log retention sweeps. All registry
//! writes go through the conditional write path, so overlapping cycles
//! cannot double-record a logical transition.

pub mod events;
pub mod reconciler;
pub mod sweep;

pub use events::PresenceEvent;
pub use reconciler::{CycleSummary, Reconciler, ReconcilerConfig};
pub use sweep::Sweeper;

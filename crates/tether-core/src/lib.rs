//! Tether Core - Core types and device registry
//!
//! This crate provides the foundational types for the Tether system:
//! - Hardware address parsing and normalization
//! - Device records with presence status and registration lifecycle
//! - Append-only change log for presence transitions
//! - Registry with per-address atomic upserts and JSON persistence

pub mod address;
pub mod changelog;
pub mod device;
pub mod registry;

pub use address::{AddressError, HardwareAddress};
pub use changelog::{ChangeRecord, ChangeType};
pub use device::{Device, PresenceStatus};
pub use registry::{Registry, RegistryError, StatusWrite};

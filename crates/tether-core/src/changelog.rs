//! Append-only change log for device lifecycle and presence transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::HardwareAddress;

/// Kind of change recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Device record created (explicit or pending registration)
    Create,
    /// Non-status mutation (registration completed, rename)
    Update,
    /// Presence transition (absent <-> present)
    StatusChange,
}

/// Write-once log entry. Never mutated after insertion; purged only by
/// the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: Uuid,
    pub address: HardwareAddress,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    /// Free-text description, e.g. "absent -> present"
    pub details: String,
}

impl ChangeRecord {
    pub fn new(
        address: HardwareAddress,
        change_type: ChangeType,
        timestamp: DateTime<Utc>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            change_type,
            timestamp,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_record_serde_shape() {
        let record = ChangeRecord::new(
            "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            ChangeType::StatusChange,
            Utc::now(),
            "absent -> present",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["changeType"], "status_change");
        assert_eq!(json["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["details"], "absent -> present");
    }
}

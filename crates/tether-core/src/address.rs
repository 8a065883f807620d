//! Hardware address parsing and normalization

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a hardware address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("hardware address is empty")]
    Empty,
    #[error("invalid hardware address format: {0}")]
    Invalid(String),
}

/// Canonical link-layer identifier of a short-range wireless device.
///
/// Stored uppercase and colon-separated (`AA:BB:CC:DD:EE:FF`). Parsing
/// accepts `:` or `-` separators and any case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareAddress(String);

impl HardwareAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HardwareAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let octets: Vec<&str> = s.split([':', '-']).collect();
        if octets.len() != 6 {
            return Err(AddressError::Invalid(s.to_string()));
        }
        for octet in &octets {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AddressError::Invalid(s.to_string()));
            }
        }

        Ok(Self(
            octets
                .iter()
                .map(|o| o.to_ascii_uppercase())
                .collect::<Vec<_>>()
                .join(":"),
        ))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let addr: HardwareAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_normalizes_case_and_separator() {
        let addr: HardwareAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");

        let mixed: HardwareAddress = "Aa:bB:cC:dd:EE:ff".parse().unwrap();
        assert_eq!(mixed, addr);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!("".parse::<HardwareAddress>(), Err(AddressError::Empty));
        assert!("not-a-real-address".parse::<HardwareAddress>().is_err());
        assert!("AA:BB:CC:DD:EE".parse::<HardwareAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<HardwareAddress>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<HardwareAddress>().is_err());
        assert!("AAA:BB:CC:DD:EE:F".parse::<HardwareAddress>().is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let addr: HardwareAddress = "11:22:33:44:55:66".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"11:22:33:44:55:66\"");
        let back: HardwareAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}

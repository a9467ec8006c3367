//! Stable machine identity.
//!
//! Every host is assigned a [`MachineId`] once, on first run, and keeps it for
//! the lifetime of its installation. The id travels in every handshake and
//! discovery datagram so peers can recognise each other across restarts and
//! address changes. On the wire and in the settings file it is rendered as 32
//! lowercase hex characters (a UUID without hyphens).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Error type for identity parsing.
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    /// The string is not 32 hex characters.
    #[error("invalid machine id {0:?}: expected 32 hex characters")]
    InvalidMachineId(String),
}

/// A stable, opaque identifier for one host.
///
/// Internally a UUID; externally always the 32-character "simple" hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineId(Uuid);

impl MachineId {
    /// Generates a fresh random identity. Called once per installation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero id, useful as a placeholder in tests.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl FromStr for MachineId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentityError::InvalidMachineId(s.to_string()));
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| IdentityError::InvalidMachineId(s.to_string()))
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for MachineId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.simple())
    }
}

impl<'de> Deserialize<'de> for MachineId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_ids() {
        assert_ne!(MachineId::generate(), MachineId::generate());
    }

    #[test]
    fn test_display_is_32_lowercase_hex_chars() {
        let id = MachineId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(s, s.to_lowercase());
    }

    #[test]
    fn test_round_trips_through_string_form() {
        let id = MachineId::generate();
        let parsed: MachineId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_hyphenated_uuid() {
        let hyphenated = Uuid::new_v4().to_string();
        let result: Result<MachineId, _> = hyphenated.parse();
        assert!(matches!(result, Err(IdentityError::InvalidMachineId(_))));
    }

    #[test]
    fn test_parse_rejects_short_and_non_hex_strings() {
        assert!("abc123".parse::<MachineId>().is_err());
        assert!("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<MachineId>().is_err());
    }

    #[test]
    fn test_serde_round_trip_as_json_string() {
        let id = MachineId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let restored: MachineId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, id);
    }
}

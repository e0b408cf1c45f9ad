//! Persisted registry snapshot.

use serde::{Deserialize, Serialize};

use super::StopLossPosition;

/// Everything the engine needs to resume after a restart.
///
/// Unknown fields are ignored on load so older binaries can read snapshots
/// written by newer ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Broker access token, if the host has one
    #[serde(default)]
    pub credential_token: Option<String>,

    /// Tracked positions, in no particular order
    #[serde(default)]
    pub positions: Vec<StopLossPosition>,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopMode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "credential_token": "tok",
            "schema": 7,
            "positions": [{
                "symbol": "INFY",
                "quantity": 5,
                "entry_price": "1500.5",
                "stop_mode": "percentage",
                "stop_parameter": "2.5",
                "high_water_mark": "1510",
                "stop_price": "1472.25",
                "broker_tag": "x"
            }]
        }"#;

        let snapshot = RegistrySnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.credential_token.as_deref(), Some("tok"));
        assert_eq!(snapshot.positions.len(), 1);

        let pos = &snapshot.positions[0];
        assert_eq!(pos.stop_mode, StopMode::Percentage);
        assert_eq!(pos.stop_price, dec!(1472.25));
        assert_eq!(pos.failed_exit_attempts, 0);
        assert!(pos.triggered_at.is_none());
    }

    #[test]
    fn test_empty_document_is_empty_snapshot() {
        let snapshot = RegistrySnapshot::from_json("{}").unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.credential_token.is_none());
    }

    #[test]
    fn test_decimals_survive_json() {
        let mut pos = StopLossPosition::new("SYM", 3, dec!(0.123456789012345678), StopMode::Fixed, dec!(0.0001))
            .unwrap();
        pos.high_water_mark = dec!(0.2000000000000000001);

        let snapshot = RegistrySnapshot {
            credential_token: None,
            positions: vec![pos],
        };
        let back = RegistrySnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(back, snapshot);
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ValidatorSet;
use neorex_crypto::PublicKeyBytes;

/// Named protocol upgrades, activated at per-network heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hardfork {
    Aspidochelone,
    Basilisk,
    Cockatrice,
    Domovoi,
    Echidna,
}

/// Static protocol parameters for one network. Loaded from config by the
/// binary and treated as immutable for the process lifetime; dynamic policy
/// (fee-per-byte and friends) lives in the policy native contract instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Network identifier mixed into every signed payload.
    pub network_magic: u32,
    pub milliseconds_per_block: u64,
    pub max_transactions_per_block: u32,
    pub max_block_size: u32,
    pub max_block_system_fee: i64,
    pub max_valid_until_block_increment: u32,
    /// Wall-clock slack allowed on incoming block timestamps.
    pub max_clock_drift_ms: u64,
    pub mempool_capacity: usize,
    /// Per-sender cap on pooled transactions.
    pub max_transactions_per_sender: usize,
    pub genesis_timestamp_ms: u64,
    /// Standby committee, compressed secp256r1 keys in hex.
    #[serde(with = "serde_pubkeys")]
    pub standby_validators: Vec<PublicKeyBytes>,
    pub hardforks: BTreeMap<Hardfork, u32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            network_magic: 860_833_102,
            milliseconds_per_block: 15_000,
            max_transactions_per_block: 512,
            max_block_size: 262_144,
            max_block_system_fee: 9_000_0000_0000,
            max_valid_until_block_increment: 5_760,
            max_clock_drift_ms: 60_000,
            mempool_capacity: 50_000,
            max_transactions_per_sender: 20,
            genesis_timestamp_ms: 1_468_595_301_000,
            standby_validators: Vec::new(),
            hardforks: BTreeMap::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn validator_set(&self) -> ValidatorSet {
        ValidatorSet::new(self.standby_validators.clone())
    }

    pub fn is_hardfork_active(&self, hardfork: Hardfork, index: u32) -> bool {
        self.hardforks
            .get(&hardfork)
            .is_some_and(|height| index >= *height)
    }

    /// Latest acceptable `valid_until_block` for a transaction admitted at
    /// `height`.
    pub fn max_valid_until(&self, height: u32) -> u32 {
        height.saturating_add(self.max_valid_until_block_increment)
    }
}

mod serde_pubkeys {
    use neorex_crypto::PublicKeyBytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        keys: &[PublicKeyBytes],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(keys.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<PublicKeyBytes>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| {
                let bytes = hex::decode(&s).map_err(de::Error::custom)?;
                neorex_crypto::ecdsa::validate_public_key(&bytes).map_err(de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_crypto::KeyPair;

    #[test]
    fn defaults_are_sane() {
        let config = ProtocolConfig::default();
        assert!(config.milliseconds_per_block > 0);
        assert!(config.max_transactions_per_block > 0);
        assert_eq!(config.max_transactions_per_sender, 20);
    }

    #[test]
    fn hardfork_activation() {
        let mut config = ProtocolConfig::default();
        config.hardforks.insert(Hardfork::Basilisk, 100);
        assert!(!config.is_hardfork_active(Hardfork::Basilisk, 99));
        assert!(config.is_hardfork_active(Hardfork::Basilisk, 100));
        assert!(!config.is_hardfork_active(Hardfork::Echidna, 1_000_000));
    }

    #[test]
    fn validator_keys_round_trip_through_serde() {
        let keys: Vec<_> = (0..4).map(|_| KeyPair::generate().public_key()).collect();
        let config = ProtocolConfig {
            standby_validators: keys.clone(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: ProtocolConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.standby_validators, keys);
    }

    #[test]
    fn serde_rejects_malformed_keys() {
        let json = r#"{"standby_validators": ["zz"]}"#;
        assert!(serde_json::from_str::<ProtocolConfig>(json).is_err());
    }
}

use std::path::Path;

use neorex_common::config::ProtocolConfig;
use neorex_crypto::KeyPair;
use neorex_storage::{EngineType, Store};
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::cli::Options;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot read config file: {0}")]
    ConfigRead(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("unknown storage engine '{0}'")]
    UnknownEngine(String),
    #[error("unknown network '{0}'")]
    UnknownNetwork(String),
    #[error("invalid consensus key: {0}")]
    BadConsensusKey(String),
    #[error("store error: {0}")]
    Store(#[from] neorex_storage::error::StoreError),
}

/// On-disk config layout; every section optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub protocol: Option<ProtocolConfig>,
}

pub fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Resolves the protocol parameters: named preset first, then the config
/// file's `[protocol]` section on top.
pub fn load_protocol_config(options: &Options) -> Result<ProtocolConfig, InitError> {
    let preset = match options.network.as_str() {
        "mainnet" => ProtocolConfig {
            network_magic: 860_833_102,
            ..Default::default()
        },
        "testnet" => ProtocolConfig {
            network_magic: 894_710_606,
            ..Default::default()
        },
        "private" => ProtocolConfig {
            network_magic: 0x4e52_5850,
            milliseconds_per_block: 1_000,
            ..Default::default()
        },
        other => return Err(InitError::UnknownNetwork(other.to_string())),
    };

    match &options.config {
        Some(path) => {
            let file = read_config_file(path)?;
            Ok(file.protocol.unwrap_or(preset))
        }
        None => Ok(preset),
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, InitError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

pub fn open_store(options: &Options) -> Result<Store, InitError> {
    let engine = match options.engine.as_str() {
        "in-memory" | "memory" => EngineType::InMemory,
        other => return Err(InitError::UnknownEngine(other.to_string())),
    };
    Ok(Store::new(engine)?)
}

pub fn load_consensus_key(options: &Options) -> Result<Option<KeyPair>, InitError> {
    let Some(hex_key) = &options.consensus_key else {
        return Ok(None);
    };
    let bytes = hex::decode(hex_key.trim_start_matches("0x"))
        .map_err(|e| InitError::BadConsensusKey(e.to_string()))?;
    let keypair =
        KeyPair::from_private_key(&bytes).map_err(|e| InitError::BadConsensusKey(e.to_string()))?;
    Ok(Some(keypair))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn presets_resolve() {
        for network in ["mainnet", "testnet", "private"] {
            let options = Options::parse_from(["neorex", "--network", network]);
            assert!(load_protocol_config(&options).is_ok());
        }
        let options = Options::parse_from(["neorex", "--network", "nonsense"]);
        assert!(matches!(
            load_protocol_config(&options),
            Err(InitError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn consensus_key_parsing() {
        let options = Options::parse_from([
            "neorex",
            "--consensus.key",
            "0000000000000000000000000000000000000000000000000000000000000001",
        ]);
        assert!(load_consensus_key(&options).expect("parse").is_some());

        let options = Options::parse_from(["neorex", "--consensus.key", "zz"]);
        assert!(load_consensus_key(&options).is_err());
    }

    #[test]
    fn unknown_engine_rejected() {
        let options = Options::parse_from(["neorex", "--engine", "leveldb"]);
        assert!(matches!(
            open_store(&options),
            Err(InitError::UnknownEngine(_))
        ));
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "neorex", author, version, about = "Neo N3 node core")]
pub struct Options {
    /// Named network preset: mainnet, testnet, or private.
    #[arg(long = "network", default_value = "private", value_name = "NETWORK")]
    pub network: String,

    /// TOML config file; CLI flags win over file values.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory (reserved for on-disk engines).
    #[arg(long = "datadir", default_value = "neorex-data", value_name = "DIR")]
    pub datadir: PathBuf,

    /// Storage engine.
    #[arg(long = "engine", default_value = "in-memory", value_name = "ENGINE")]
    pub engine: String,

    /// P2P listen endpoint, e.g. 0.0.0.0:10333. Omit to run dial-only.
    #[arg(long = "p2p.addr", value_name = "ADDR")]
    pub p2p_addr: Option<SocketAddr>,

    /// Seed peers to dial at startup.
    #[arg(long = "p2p.seeds", value_delimiter = ',', value_name = "ADDR,...")]
    pub p2p_seeds: Vec<SocketAddr>,

    /// Hex-encoded secp256r1 private key enabling the consensus engine.
    /// Leave unset to run as a plain full node.
    #[arg(long = "consensus.key", value_name = "HEX", env = "NEOREX_CONSENSUS_KEY")]
    pub consensus_key: Option<String>,

    /// Log filter, EnvFilter syntax.
    #[arg(long = "log.filter", default_value = "info", value_name = "FILTER")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let options = Options::parse_from(["neorex"]);
        assert_eq!(options.network, "private");
        assert!(options.p2p_addr.is_none());
        assert!(options.consensus_key.is_none());
    }

    #[test]
    fn seeds_are_comma_separated() {
        let options = Options::parse_from([
            "neorex",
            "--p2p.seeds",
            "10.0.0.1:10333,10.0.0.2:10333",
        ]);
        assert_eq!(options.p2p_seeds.len(), 2);
    }
}

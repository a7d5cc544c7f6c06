use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use neorex::cli::Options;
use neorex::initializers::{init_tracing, load_consensus_key, load_protocol_config, open_store};
use neorex::Node;
use neorex_p2p::NetworkConfig;

#[tokio::main]
async fn main() {
    let options = Options::parse();
    init_tracing(&options.log_filter);

    if let Err(error) = run(options).await {
        error!(%error, "node exited with error");
        std::process::exit(1);
    }
}

async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(load_protocol_config(&options)?);
    let store = open_store(&options)?;
    let consensus_key = load_consensus_key(&options)?;

    let net_config = NetworkConfig {
        bind: options.p2p_addr,
        seeds: options.p2p_seeds.clone(),
        ..Default::default()
    };

    let node = Node::start(config, store, net_config, consensus_key).await?;
    info!("node running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}

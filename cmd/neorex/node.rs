use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use neorex_blockchain::events::EventBus;
use neorex_blockchain::mempool::Mempool;
use neorex_blockchain::Blockchain;
use neorex_common::config::ProtocolConfig;
use neorex_consensus::DbftService;
use neorex_crypto::KeyPair;
use neorex_p2p::{LocalNode, NetworkConfig};
use neorex_storage::Store;

/// Inbound consensus queue depth between the network plane and the engine.
const CONSENSUS_INBOX_CAPACITY: usize = 256;

/// Grace period for inbound queues to drain during shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

/// The node aggregate: explicit handles instead of global singletons, so
/// collaborators receive exactly the components they need.
pub struct Node {
    config: Arc<ProtocolConfig>,
    blockchain: Arc<Blockchain>,
    network: Arc<LocalNode>,
    consensus_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Node {
    /// Wires the core together and starts the network plane and, when a
    /// validator key is present, the consensus engine.
    pub async fn start(
        config: Arc<ProtocolConfig>,
        store: Store,
        net_config: NetworkConfig,
        consensus_key: Option<KeyPair>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let events = EventBus::new();
        let blockchain = Arc::new(Blockchain::new(config.clone(), store, events)?);
        info!(
            height = blockchain.height()?,
            magic = config.network_magic,
            "chain opened"
        );

        let network = LocalNode::new(config.clone(), net_config, blockchain.clone());
        network.start().await?;
        let cancel = network.cancellation_token();

        let consensus_task = match consensus_key {
            Some(keypair) => {
                let (inbox_tx, inbox_rx) = mpsc::channel(CONSENSUS_INBOX_CAPACITY);
                network.register_consensus_inbox(inbox_tx);
                let service = DbftService::new(
                    blockchain.clone(),
                    Some(keypair),
                    network.clone(),
                    cancel.clone(),
                )?;
                info!("consensus engine enabled");
                Some(tokio::spawn(service.run(inbox_rx)))
            }
            None => None,
        };

        Ok(Self {
            config,
            blockchain,
            network,
            consensus_task,
            cancel,
        })
    }

    pub fn config(&self) -> &Arc<ProtocolConfig> {
        &self.config
    }

    pub fn blockchain(&self) -> &Arc<Blockchain> {
        &self.blockchain
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        self.blockchain.mempool()
    }

    pub fn network(&self) -> &Arc<LocalNode> {
        &self.network
    }

    /// Ordered shutdown: stop ingress, give queues a bounded drain, stop
    /// consensus and the executor, then release the store.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.network.shutdown();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        self.cancel.cancel();
        if let Some(task) = self.consensus_task.take() {
            if let Err(join_error) = task.await {
                error!(%join_error, "consensus task ended abnormally");
            }
        }
        info!("node stopped");
    }
}

//! Engine-level dBFT scenarios: block production on a single-validator
//! net, a four-validator committee reaching quorum over a message bus, and
//! view change around a silent primary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use neorex_blockchain::events::EventBus;
use neorex_blockchain::native::gas_token;
use neorex_blockchain::native::GAS_ID;
use neorex_blockchain::vm::{extract_signatures, native_call_script, signature_invocation};
use neorex_blockchain::Blockchain;
use neorex_common::config::ProtocolConfig;
use neorex_common::signing::signing_data;
use neorex_common::types::{multi_sig_script, Signer, Transaction, UInt160, UInt256, Witness};
use neorex_consensus::{ConsensusNetwork, DbftService};
use neorex_crypto::KeyPair;
use neorex_p2p::payloads::ExtensiblePayload;
use neorex_storage::{EngineType, Store};

struct SilentNetwork;

impl ConsensusNetwork for SilentNetwork {
    fn broadcast(&self, _payload: ExtensiblePayload) {}
    fn request_transactions(&self, _hashes: Vec<UInt256>) {}
}

/// Full-mesh message bus standing in for the p2p plane.
struct Bus {
    inboxes: Mutex<Vec<(usize, mpsc::Sender<ExtensiblePayload>)>>,
}

impl Bus {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: Mutex::new(Vec::new()),
        })
    }

    fn register(self: &Arc<Self>, index: usize) -> (BusPort, mpsc::Receiver<ExtensiblePayload>) {
        let (tx, rx) = mpsc::channel(1024);
        self.inboxes.lock().expect("bus lock").push((index, tx));
        (
            BusPort {
                bus: self.clone(),
                index,
            },
            rx,
        )
    }
}

struct BusPort {
    bus: Arc<Bus>,
    index: usize,
}

impl ConsensusNetwork for BusPort {
    fn broadcast(&self, payload: ExtensiblePayload) {
        let inboxes = self.bus.inboxes.lock().expect("bus lock");
        for (index, sender) in inboxes.iter() {
            if *index != self.index {
                let _ = sender.try_send(payload.clone());
            }
        }
    }

    fn request_transactions(&self, _hashes: Vec<UInt256>) {}
}

fn test_config(validators: &[KeyPair], block_ms: u64) -> Arc<ProtocolConfig> {
    Arc::new(ProtocolConfig {
        standby_validators: validators.iter().map(KeyPair::public_key).collect(),
        milliseconds_per_block: block_ms,
        ..Default::default()
    })
}

fn open_chain(config: Arc<ProtocolConfig>) -> Arc<Blockchain> {
    let store = Store::new(EngineType::InMemory).expect("open store");
    Arc::new(Blockchain::new(config, store, EventBus::new()).expect("bootstrap"))
}

async fn wait_for_height(chain: &Blockchain, target: u32, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if chain.height().expect("height") >= target {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn single_validator_chain_advances() {
    let validator = KeyPair::generate();
    let config = test_config(std::slice::from_ref(&validator), 200);
    let chain = open_chain(config.clone());

    let cancel = CancellationToken::new();
    let service = DbftService::new(
        chain.clone(),
        Some(validator),
        Arc::new(SilentNetwork),
        cancel.clone(),
    )
    .expect("service");
    let (_inbox_tx, inbox_rx) = mpsc::channel(64);
    let runner = tokio::spawn(service.run(inbox_rx));

    assert!(
        wait_for_height(&chain, 2, Duration::from_secs(10)).await,
        "single-validator chain should reach height 2"
    );
    cancel.cancel();
    let _ = runner.await;

    // Every produced block is empty, primary 0, and witnessed by the
    // committee address the parent committed to.
    for index in 1..=2u32 {
        let block = chain
            .store()
            .get_block_by_index(index)
            .expect("read")
            .expect("block");
        assert!(block.transactions.is_empty());
        assert_eq!(block.header.primary_index, 0);

        let parent = chain
            .store()
            .get_header_by_index(index - 1)
            .expect("read")
            .expect("parent");
        assert_eq!(
            block.header.witness.script_hash(),
            Some(parent.next_consensus)
        );
        assert!(block.header.timestamp > parent.timestamp);
    }
}

#[tokio::test]
async fn single_validator_includes_pooled_transactions() {
    let validator = KeyPair::generate();
    let config = test_config(std::slice::from_ref(&validator), 200);
    let chain = open_chain(config.clone());

    // A committee-signed GAS transfer, funded by the genesis supply.
    let committee = config.validator_set().next_consensus().expect("committee");
    let recipient = UInt160::from_bytes([9; 20]);
    let mut tx = Transaction {
        nonce: 1,
        system_fee: 1 << 17,
        network_fee: 0,
        valid_until_block: 100,
        signers: vec![Signer::called_by_entry(committee)],
        script: native_call_script(
            GAS_ID,
            "transfer",
            &gas_token::encode_transfer_args(&committee, &recipient, 250),
        ),
        witnesses: vec![Witness::default()],
        ..Default::default()
    };
    tx.network_fee = (tx.size() as i64 + 2_048) * 10_000;
    let message = signing_data(config.network_magic, &tx.hash());
    let verification =
        multi_sig_script(1, config.validator_set().keys()).expect("committee script");
    tx.witnesses = vec![Witness::new(
        signature_invocation(&[validator.sign(&message)]),
        verification,
    )];
    let hash = chain.add_transaction(tx).expect("admitted");
    assert!(chain.mempool().contains(&hash));

    let cancel = CancellationToken::new();
    let service = DbftService::new(
        chain.clone(),
        Some(validator),
        Arc::new(SilentNetwork),
        cancel.clone(),
    )
    .expect("service");
    let (_inbox_tx, inbox_rx) = mpsc::channel(64);
    let runner = tokio::spawn(service.run(inbox_rx));

    assert!(
        wait_for_height(&chain, 1, Duration::from_secs(10)).await,
        "block with the transaction should persist"
    );
    cancel.cancel();
    let _ = runner.await;

    assert!(chain.store().contains_transaction(&hash).expect("read"));
    assert!(!chain.mempool().contains(&hash));
    let snapshot = chain.store().snapshot().expect("snapshot");
    assert_eq!(
        gas_token::balance(&snapshot, &recipient).expect("balance"),
        250
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_validators_reach_quorum() {
    let validators: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
    let config = test_config(&validators, 300);
    let bus = Bus::new();
    let cancel = CancellationToken::new();

    // Register every inbox before any service can start proposing, so no
    // early broadcast is lost.
    let mut endpoints = Vec::new();
    for index in 0..validators.len() {
        endpoints.push(bus.register(index));
    }

    let mut chains = Vec::new();
    let mut runners = Vec::new();
    for (keypair, (port, inbox)) in validators.iter().zip(endpoints) {
        let chain = open_chain(config.clone());
        let service = DbftService::new(
            chain.clone(),
            Some(keypair.clone()),
            Arc::new(port),
            cancel.clone(),
        )
        .expect("service");
        runners.push(tokio::spawn(service.run(inbox)));
        chains.push(chain);
    }

    for chain in &chains {
        assert!(
            wait_for_height(chain, 1, Duration::from_secs(20)).await,
            "all four validators should persist height 1"
        );
    }
    cancel.cancel();
    for runner in runners {
        let _ = runner.await;
    }

    // Same block everywhere, carrying at least M = 3 commit signatures.
    let reference = chains[0]
        .store()
        .get_block_by_index(1)
        .expect("read")
        .expect("block");
    let signatures =
        extract_signatures(&reference.header.witness.invocation).expect("witness signatures");
    assert!(signatures.len() >= 3, "quorum is 3 of 4");
    for chain in &chains[1..] {
        let block = chain
            .store()
            .get_block_by_index(1)
            .expect("read")
            .expect("block");
        assert_eq!(block.hash(), reference.hash(), "no forks at height 1");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn view_change_skips_silent_primary() {
    let validators: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
    let config = test_config(&validators, 300);
    let bus = Bus::new();
    let cancel = CancellationToken::new();

    // Primary for height 1 view 0 is validator (1 - 0) mod 4 = 1. Mute it.
    let silent_primary = config.validator_set().primary_index(1, 0);
    let expected_new_primary = config.validator_set().primary_index(1, 1);

    let mut endpoints = Vec::new();
    for index in 0..validators.len() {
        endpoints.push(bus.register(index));
    }

    let mut chains = Vec::new();
    let mut runners = Vec::new();
    for (keypair, (port, inbox)) in validators.iter().zip(endpoints) {
        let sorted_index = config
            .validator_set()
            .index_of(&keypair.public_key())
            .expect("in committee");
        if sorted_index == silent_primary {
            // Registered on the bus but never run: a crashed primary.
            drop(inbox);
            drop(port);
            continue;
        }
        let chain = open_chain(config.clone());
        let service = DbftService::new(
            chain.clone(),
            Some(keypair.clone()),
            Arc::new(port),
            cancel.clone(),
        )
        .expect("service");
        runners.push(tokio::spawn(service.run(inbox)));
        chains.push(chain);
    }
    assert_eq!(chains.len(), 3);

    for chain in &chains {
        assert!(
            wait_for_height(chain, 1, Duration::from_secs(30)).await,
            "the three live validators should persist height 1 after a view change"
        );
    }
    cancel.cancel();
    for runner in runners {
        let _ = runner.await;
    }

    let block = chains[0]
        .store()
        .get_block_by_index(1)
        .expect("read")
        .expect("block");
    assert_eq!(
        block.header.primary_index, expected_new_primary,
        "the view-1 primary proposed the block"
    );
    let signatures =
        extract_signatures(&block.header.witness.invocation).expect("witness signatures");
    assert!(signatures.len() >= 3);
}

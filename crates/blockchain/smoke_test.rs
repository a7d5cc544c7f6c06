//! End-to-end pipeline tests over the in-memory engine: genesis, block
//! production, transaction flow through pool and persist, and the
//! rejection paths a hostile peer would probe.

use std::sync::Arc;

use neorex_common::config::ProtocolConfig;
use neorex_common::signing::signing_data;
use neorex_common::types::{
    multi_sig_script, single_sig_script, Block, Signer, Transaction, UInt160, UInt256, Witness,
};
use neorex_crypto::KeyPair;
use neorex_storage::{EngineType, Store};

use crate::error::{ChainError, InvalidBlockError, MempoolError};
use crate::events::EventBus;
use crate::native::gas_token::{self, encode_transfer_args, INITIAL_SUPPLY};
use crate::native::GAS_ID;
use crate::payload::{build_proposal, ProposalParams};
use crate::vm::{native_call_script, signature_invocation};
use crate::{Blockchain, BlockOrigin};

struct TestNet {
    chain: Blockchain,
    config: Arc<ProtocolConfig>,
    validators: Vec<KeyPair>,
}

impl TestNet {
    /// Single-validator network with a committee that owns all genesis GAS.
    fn new(n: usize) -> Self {
        let validators: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
        let config = Arc::new(ProtocolConfig {
            standby_validators: validators.iter().map(KeyPair::public_key).collect(),
            milliseconds_per_block: 1_000,
            ..Default::default()
        });
        let store = Store::new(EngineType::InMemory).expect("open store");
        let chain = Blockchain::new(config.clone(), store, EventBus::new()).expect("bootstrap");
        Self {
            chain,
            config,
            validators,
        }
    }

    fn committee_account(&self) -> UInt160 {
        self.config
            .validator_set()
            .next_consensus()
            .expect("committee")
    }

    /// The committee witness over an arbitrary payload hash.
    fn committee_witness(&self, payload_hash: &UInt256) -> Witness {
        let set = self.config.validator_set();
        let m = set.quorum();
        let message = signing_data(self.config.network_magic, payload_hash);

        // Sign with the first `m` validators in sorted-key order.
        let mut by_key: Vec<&KeyPair> = self.validators.iter().collect();
        by_key.sort_by_key(|kp| kp.public_key());
        let signatures: Vec<[u8; 64]> = by_key
            .iter()
            .take(m)
            .map(|kp| kp.sign(&message))
            .collect();

        let verification =
            multi_sig_script(m, set.keys()).expect("committee script");
        Witness::new(signature_invocation(&signatures), verification)
    }

    /// Builds, witnesses, and returns the next block from the current pool.
    fn produce_block(&self) -> Block {
        let prev = self.chain.tip_header().expect("tip");
        let params = ProposalParams {
            index: prev.index + 1,
            prev_hash: prev.hash(),
            prev_timestamp: prev.timestamp,
            primary_index: self
                .config
                .validator_set()
                .primary_index(prev.index + 1, 0),
            next_consensus: self.committee_account(),
            timestamp: prev.timestamp + self.config.milliseconds_per_block,
            nonce: 7,
            };
        let mut block = build_proposal(&self.config, self.chain.mempool(), params);
        block.header.witness = self.committee_witness(&block.hash());
        block
    }

    /// A signed GAS transfer from the committee account.
    fn committee_transfer(&self, to: UInt160, amount: i64, nonce: u32) -> Transaction {
        let height = self.chain.height().expect("height");
        let mut tx = Transaction {
            nonce,
            system_fee: 1 << 17,
            network_fee: 0,
            valid_until_block: height + 100,
            signers: vec![Signer::called_by_entry(self.committee_account())],
            script: native_call_script(
                GAS_ID,
                "transfer",
                &encode_transfer_args(&self.committee_account(), &to, amount),
            ),
            witnesses: vec![Witness::default()],
            ..Default::default()
        };
        // Fee floor is per byte of the final size; the witness only grows
        // the transaction, so pad generously before signing.
        tx.network_fee = (tx.size() as i64 + 2_048) * 10_000;
        tx.witnesses = vec![self.committee_witness(&tx.hash())];
        tx
    }
}

#[test]
fn genesis_bootstrap_seeds_natives() {
    let net = TestNet::new(1);
    assert_eq!(net.chain.height().expect("height"), 0);

    let snapshot = net.chain.store().snapshot().expect("snapshot");
    let committee = net.committee_account();
    assert_eq!(
        gas_token::balance(&snapshot, &committee).expect("balance"),
        INITIAL_SUPPLY
    );
}

#[test]
fn empty_blocks_extend_the_chain() {
    let net = TestNet::new(1);
    for expected in 1..=3u32 {
        let block = net.produce_block();
        assert_eq!(block.header.primary_index, 0);
        net.chain
            .add_block(block.clone(), BlockOrigin::Network)
            .expect("persist");
        assert_eq!(net.chain.height().expect("height"), expected);
        assert_eq!(net.chain.tip_hash().expect("tip"), block.hash());

        // Chain monotonicity.
        let prev = net
            .chain
            .store()
            .get_header_by_index(expected - 1)
            .expect("read")
            .expect("parent");
        assert_eq!(block.prev_hash(), prev.hash());
        assert!(block.header.timestamp > prev.timestamp);
    }
}

#[test]
fn transaction_flows_from_pool_to_block() {
    let net = TestNet::new(1);
    let recipient = UInt160::from_bytes([9; 20]);
    let tx = net.committee_transfer(recipient, 100, 1);
    let fees = tx.network_fee + tx.system_fee;
    let hash = net.chain.add_transaction(tx).expect("admitted");
    assert!(net.chain.mempool().contains(&hash));

    let block = net.produce_block();
    assert!(block.transactions.iter().any(|tx| tx.hash() == hash));
    net.chain
        .add_block(block, BlockOrigin::Network)
        .expect("persist");

    // Drained from the pool, applied to state.
    assert!(!net.chain.mempool().contains(&hash));
    let snapshot = net.chain.store().snapshot().expect("snapshot");
    assert_eq!(
        gas_token::balance(&snapshot, &recipient).expect("balance"),
        100
    );
    // The network fee came back to the (sole) primary, who is not the
    // committee multi-sig account, so the committee paid fees plus amount.
    let committee_balance =
        gas_token::balance(&snapshot, &net.committee_account()).expect("balance");
    assert_eq!(committee_balance, INITIAL_SUPPLY - 100 - fees);
    assert!(net.chain.store().contains_transaction(&hash).expect("read"));
}

#[test]
fn double_submit_rejected_pool_unchanged() {
    let net = TestNet::new(1);
    let tx = net.committee_transfer(UInt160::from_bytes([9; 20]), 1, 1);
    net.chain.add_transaction(tx.clone()).expect("first");
    assert_eq!(
        net.chain.add_transaction(tx),
        Err(MempoolError::Conflict)
    );
    assert_eq!(net.chain.mempool().count(), 1);
}

#[test]
fn unfunded_sender_rejected() {
    let net = TestNet::new(1);
    let broke = KeyPair::generate();
    let account = UInt160::hash160_of(&single_sig_script(&broke.public_key()));
    let mut tx = Transaction {
        nonce: 1,
        network_fee: 10_000_000,
        valid_until_block: 100,
        signers: vec![Signer::called_by_entry(account)],
        script: vec![0x40],
        witnesses: vec![Witness::default()],
        ..Default::default()
    };
    let message = signing_data(net.config.network_magic, &tx.hash());
    tx.witnesses = vec![Witness::new(
        signature_invocation(&[broke.sign(&message)]),
        single_sig_script(&broke.public_key()),
    )];
    assert!(matches!(
        net.chain.add_transaction(tx),
        Err(MempoolError::Invalid(_))
    ));
}

#[test]
fn block_with_bad_witness_rejected() {
    let net = TestNet::new(1);
    let mut block = net.produce_block();
    // A witness from a different committee.
    let stranger = TestNet::new(1);
    block.header.witness = stranger.committee_witness(&block.hash());

    match net.chain.add_block(block, BlockOrigin::Network) {
        Err(ChainError::InvalidBlock(InvalidBlockError::InvalidBlockWitness)) => {}
        other => panic!("expected invalid witness, got {other:?}"),
    }
    assert_eq!(net.chain.height().expect("height"), 0);
}

#[test]
fn block_with_tampered_merkle_root_rejected() {
    let net = TestNet::new(1);
    let tx = net.committee_transfer(UInt160::from_bytes([9; 20]), 5, 1);
    net.chain.add_transaction(tx).expect("admit");

    let mut block = net.produce_block();
    block.header.merkle_root = UInt256::hash256_of(b"lies");
    block.header.witness = net.committee_witness(&block.hash());

    match net.chain.add_block(block, BlockOrigin::Network) {
        Err(ChainError::InvalidBlock(InvalidBlockError::MerkleRootMismatch)) => {}
        other => panic!("expected merkle mismatch, got {other:?}"),
    }
}

#[test]
fn no_two_blocks_persist_at_one_height() {
    let net = TestNet::new(1);
    let block_a = net.produce_block();
    let mut block_b = net.produce_block();
    block_b.header.nonce = 999; // different block, same height
    block_b.header.witness = net.committee_witness(&block_b.hash());

    net.chain
        .add_block(block_a.clone(), BlockOrigin::Network)
        .expect("first");
    match net.chain.add_block(block_b, BlockOrigin::Network) {
        Err(ChainError::InvalidBlock(InvalidBlockError::NonSequentialIndex { .. })) => {}
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(
        net.chain.store().get_block_hash(1).expect("read"),
        Some(block_a.hash())
    );
}

#[test]
fn orphan_connects_when_parent_arrives() {
    let net = TestNet::new(1);
    let block_1 = net.produce_block();
    net.chain
        .add_block(block_1.clone(), BlockOrigin::Network)
        .expect("persist 1");
    let block_2 = net.produce_block();

    // Rebuild state and replay out of order.
    let replay = TestNet {
        chain: Blockchain::new(
            net.config.clone(),
            Store::new(EngineType::InMemory).expect("open"),
            EventBus::new(),
        )
        .expect("bootstrap"),
        config: net.config.clone(),
        validators: Vec::new(),
    };
    assert!(matches!(
        replay.chain.add_block(block_2.clone(), BlockOrigin::Network),
        Err(ChainError::ParentNotFound)
    ));
    assert_eq!(replay.chain.height().expect("height"), 0);

    replay
        .chain
        .add_block(block_1, BlockOrigin::Network)
        .expect("parent persists and pulls the orphan in");
    assert_eq!(replay.chain.height().expect("height"), 2);
    assert_eq!(replay.chain.tip_hash().expect("tip"), block_2.hash());
}

#[test]
fn faulting_script_keeps_fee_and_reverts_state() {
    let net = TestNet::new(1);
    let committee = net.committee_account();

    // A transaction whose script is not a recognized native call: it
    // faults, the fee is burned, nothing else changes.
    let mut tx = net.committee_transfer(UInt160::from_bytes([9; 20]), 50, 1);
    tx.script = vec![0x00, 0x51, 0x52];
    tx.witnesses = vec![net.committee_witness(&tx.hash())];
    let fees = tx.network_fee + tx.system_fee;

    net.chain.add_transaction(tx.clone()).expect("admitted");
    let block = net.produce_block();
    net.chain
        .add_block(block, BlockOrigin::Network)
        .expect("block persists despite the fault");

    let snapshot = net.chain.store().snapshot().expect("snapshot");
    assert_eq!(
        gas_token::balance(&snapshot, &committee).expect("balance"),
        INITIAL_SUPPLY - fees
    );
    // The transfer never happened.
    assert_eq!(
        gas_token::balance(&snapshot, &UInt160::from_bytes([9; 20])).expect("balance"),
        0
    );
    assert!(net
        .chain
        .store()
        .contains_transaction(&tx.hash())
        .expect("read"));
}

#[test]
fn four_validator_committee_produces_blocks() {
    let net = TestNet::new(4);
    let block = net.produce_block();
    net.chain
        .add_block(block, BlockOrigin::Network)
        .expect("3-of-4 witness verifies");
    assert_eq!(net.chain.height().expect("height"), 1);
}

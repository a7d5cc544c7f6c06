//! Block proposal assembly for the consensus primary.

use std::sync::Arc;

use neorex_common::config::ProtocolConfig;
use neorex_common::types::{Block, Header, Transaction, UInt160, UInt256};
use neorex_io::NeoEncode;

use crate::mempool::Mempool;

/// Serialized overhead of an empty block: header plus the transaction
/// count prefix. The header's witness is not known at proposal time, so the
/// worst-case multi-sig witness size is reserved instead.
const RESERVED_WITNESS_SIZE: usize = 1024 + 16;

/// Inputs the dBFT primary fixes for its proposal.
#[derive(Debug, Clone)]
pub struct ProposalParams {
    pub index: u32,
    pub prev_hash: UInt256,
    pub prev_timestamp: u64,
    pub primary_index: u8,
    pub next_consensus: UInt160,
    pub timestamp: u64,
    pub nonce: u64,
}

/// Builds the block a primary proposes: pool transactions in fee order
/// under the policy budgets, merkle root rebuilt, witness left empty for
/// the commit phase to fill.
pub fn build_proposal(
    config: &ProtocolConfig,
    mempool: &Mempool,
    params: ProposalParams,
) -> Block {
    let header_overhead = {
        let empty = Header {
            version: 0,
            prev_hash: params.prev_hash,
            merkle_root: UInt256::zero(),
            timestamp: params.timestamp,
            nonce: params.nonce,
            index: params.index,
            primary_index: params.primary_index,
            next_consensus: params.next_consensus,
            witness: Default::default(),
        };
        empty.encoded_size() + RESERVED_WITNESS_SIZE
    };
    let budget = (config.max_block_size as usize).saturating_sub(header_overhead);

    let transactions: Vec<Transaction> = mempool
        .get_sorted(
            config.max_transactions_per_block as usize,
            budget,
            config.max_block_system_fee,
            params.index.saturating_sub(1),
        )
        .iter()
        .map(|tx| tx.as_ref().clone())
        .collect();

    let timestamp = params.timestamp.max(params.prev_timestamp + 1);

    let mut block = Block {
        header: Header {
            version: 0,
            prev_hash: params.prev_hash,
            merkle_root: UInt256::zero(),
            timestamp,
            nonce: params.nonce,
            index: params.index,
            primary_index: params.primary_index,
            next_consensus: params.next_consensus,
            witness: Default::default(),
        },
        transactions,
    };
    block.rebuild_merkle_root();
    block
}

/// Convenience for tests and the consensus engine: clone out of `Arc`s.
pub fn clone_transactions(txs: &[Arc<Transaction>]) -> Vec<Transaction> {
    txs.iter().map(|tx| tx.as_ref().clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::mempool::{Mempool, PoolVerifier};
    use neorex_common::types::{Signer, Witness};

    struct AcceptAll;
    impl PoolVerifier for AcceptAll {
        fn verify_for_pool(
            &self,
            _tx: &Transaction,
        ) -> Result<u32, crate::error::MempoolError> {
            Ok(0)
        }
    }

    fn params() -> ProposalParams {
        ProposalParams {
            index: 1,
            prev_hash: UInt256::hash256_of(b"genesis"),
            prev_timestamp: 1_000,
            primary_index: 0,
            next_consensus: UInt160::from_bytes([5; 20]),
            timestamp: 2_000,
            nonce: 99,
        }
    }

    fn sample_tx(sender: u8, fee: i64) -> Transaction {
        Transaction {
            nonce: u32::from(sender),
            network_fee: fee,
            valid_until_block: 100,
            signers: vec![Signer::called_by_entry(UInt160::from_bytes([sender; 20]))],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Default::default()
        }
    }

    #[test]
    fn proposal_orders_by_fee_and_commits_merkle_root() {
        let config = ProtocolConfig::default();
        let mempool = Mempool::new(100, 20, EventBus::new());
        mempool.try_add(sample_tx(1, 10_000), &AcceptAll).expect("add");
        mempool.try_add(sample_tx(2, 9_000_000), &AcceptAll).expect("add");

        let block = build_proposal(&config, &mempool, params());
        assert_eq!(block.index(), 1);
        assert_eq!(block.transactions.len(), 2);
        assert!(
            block.transactions[0].fee_per_byte() >= block.transactions[1].fee_per_byte()
        );
        assert_eq!(block.header.merkle_root, block.compute_merkle_root());
    }

    #[test]
    fn proposal_timestamp_always_advances() {
        let config = ProtocolConfig::default();
        let mempool = Mempool::new(100, 20, EventBus::new());
        let mut p = params();
        p.prev_timestamp = 10_000;
        p.timestamp = 500; // clock behind the parent
        let block = build_proposal(&config, &mempool, p);
        assert_eq!(block.header.timestamp, 10_001);
    }

    #[test]
    fn empty_pool_yields_empty_block() {
        let config = ProtocolConfig::default();
        let mempool = Mempool::new(100, 20, EventBus::new());
        let block = build_proposal(&config, &mempool, params());
        assert!(block.transactions.is_empty());
        assert_eq!(block.header.merkle_root, UInt256::zero());
    }
}

//! Deterministic genesis construction.
//!
//! Every node derives the same genesis block from its protocol config, so
//! the block is built rather than shipped.

use crate::config::ProtocolConfig;

use super::{Block, Header, UInt160, UInt256, Witness};

/// Fixed genesis nonce; the dBFT nonce field only matters for later blocks.
pub const GENESIS_NONCE: u64 = 0x4e45_4f33_0000_0000;

// PUSH1: the placeholder verification accepted only at index 0.
const GENESIS_WITNESS_SCRIPT: [u8; 1] = [0x11];

/// Builds the genesis block for a network. Committee-less configs (tests,
/// observers) get a zero `next_consensus`.
pub fn genesis_block(config: &ProtocolConfig) -> Block {
    let next_consensus = config
        .validator_set()
        .next_consensus()
        .unwrap_or_else(UInt160::zero);

    let header = Header {
        version: 0,
        prev_hash: UInt256::zero(),
        merkle_root: UInt256::zero(),
        timestamp: config.genesis_timestamp_ms,
        nonce: GENESIS_NONCE,
        index: 0,
        primary_index: 0,
        next_consensus,
        witness: Witness::new(Vec::new(), GENESIS_WITNESS_SCRIPT.to_vec()),
        ..Default::default()
    };

    Block {
        header,
        transactions: Vec::new(),
    }
}

//! Persisted-state key layout.
//!
//! Every key starts with a one-byte prefix. Index-keyed entries use
//! big-endian indices so lexicographic `seek` order equals numeric order.

use neorex_common::types::{UInt160, UInt256};

pub const BLOCK: u8 = 0x01;
pub const BLOCK_HASH_BY_INDEX: u8 = 0x02;
pub const TRANSACTION: u8 = 0x03;
pub const HEADER: u8 = 0x04;
pub const HEADER_HASH_BY_INDEX: u8 = 0x05;
pub const CONTRACT: u8 = 0x0e;
pub const STORAGE: u8 = 0x70;
pub const CURRENT_BLOCK: u8 = 0xc0;
pub const CURRENT_HEADER: u8 = 0xc1;
pub const CONSENSUS_STATE: u8 = 0xf4;

pub fn block(hash: &UInt256) -> Vec<u8> {
    prefixed(BLOCK, hash.as_ref())
}

pub fn block_hash_by_index(index: u32) -> Vec<u8> {
    prefixed(BLOCK_HASH_BY_INDEX, &index.to_be_bytes())
}

pub fn transaction(hash: &UInt256) -> Vec<u8> {
    prefixed(TRANSACTION, hash.as_ref())
}

pub fn header(hash: &UInt256) -> Vec<u8> {
    prefixed(HEADER, hash.as_ref())
}

pub fn header_hash_by_index(index: u32) -> Vec<u8> {
    prefixed(HEADER_HASH_BY_INDEX, &index.to_be_bytes())
}

pub fn contract(id: i32) -> Vec<u8> {
    prefixed(CONTRACT, &order_preserving(id))
}

/// `(contract_id, key)` storage item. The id is sign-flipped so negative
/// (native) ids sort before positive ones under lexicographic seek.
pub fn storage_item(contract_id: i32, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + key.len());
    out.push(STORAGE);
    out.extend_from_slice(&order_preserving(contract_id));
    out.extend_from_slice(key);
    out
}

/// Prefix covering every storage item of one contract.
pub fn storage_prefix(contract_id: i32) -> Vec<u8> {
    prefixed(STORAGE, &order_preserving(contract_id))
}

pub fn current_block() -> Vec<u8> {
    vec![CURRENT_BLOCK]
}

pub fn current_header() -> Vec<u8> {
    vec![CURRENT_HEADER]
}

/// Per-validator commit decision, keyed by the validator's script hash.
pub fn consensus_state(account: &UInt160) -> Vec<u8> {
    prefixed(CONSENSUS_STATE, account.as_ref())
}

fn prefixed(prefix: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(prefix);
    out.extend_from_slice(body);
    out
}

fn order_preserving(id: i32) -> [u8; 4] {
    ((id as u32) ^ 0x8000_0000).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_keys_sort_numerically() {
        assert!(block_hash_by_index(1) < block_hash_by_index(2));
        assert!(block_hash_by_index(255) < block_hash_by_index(256));
    }

    #[test]
    fn negative_contract_ids_sort_first() {
        assert!(storage_prefix(-5) < storage_prefix(-1));
        assert!(storage_prefix(-1) < storage_prefix(0));
        assert!(storage_prefix(0) < storage_prefix(7));
    }

    #[test]
    fn storage_keys_share_contract_prefix() {
        let key = storage_item(-2, b"balance");
        assert!(key.starts_with(&storage_prefix(-2)));
    }
}

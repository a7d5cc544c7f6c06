//! Signing payload construction.
//!
//! Every signature in the protocol covers `network_magic || hash256(item)`,
//! binding it to one network: a witness signed for a testnet transaction
//! can never authorize the same bytes on mainnet.

use crate::types::UInt256;

pub fn signing_data(network_magic: u32, hash: &UInt256) -> [u8; 36] {
    let mut data = [0u8; 36];
    data[..4].copy_from_slice(&network_magic.to_le_bytes());
    data[4..].copy_from_slice(hash.as_bytes());
    data
}

use bytes::BufMut;
use neorex_io::{
    decode::decode_var_array,
    encode::{var_int_size, write_var_int},
    DecodeError, NeoDecode, NeoEncode,
};

use super::{Transaction, UInt160, UInt256, Witness};
use neorex_crypto::MerkleTree;

/// Block header. Hash covers every field except the witness, so the
/// committee can sign the digest before the witness exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_hash: UInt256,
    pub merkle_root: UInt256,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub nonce: u64,
    pub index: u32,
    pub primary_index: u8,
    pub next_consensus: UInt160,
    pub witness: Witness,
}

impl Header {
    pub fn hash(&self) -> UInt256 {
        UInt256::hash256_of(&self.unsigned_bytes())
    }

    /// The digest validators sign: every field but the witness.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_unsigned(&mut buf);
        buf
    }

    fn encode_unsigned(&self, buf: &mut dyn BufMut) {
        self.version.encode(buf);
        self.prev_hash.encode(buf);
        self.merkle_root.encode(buf);
        self.timestamp.encode(buf);
        self.nonce.encode(buf);
        self.index.encode(buf);
        self.primary_index.encode(buf);
        self.next_consensus.encode(buf);
    }
}

impl NeoEncode for Header {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.encode_unsigned(buf);
        // The wire format frames the witness as a one-element array.
        write_var_int(1, buf);
        self.witness.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        4 + 32 + 32 + 8 + 8 + 4 + 1 + 20 + 1 + self.witness.encoded_size()
    }
}

impl NeoDecode for Header {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (version, rest) = u32::decode_unfinished(buf)?;
        if version != 0 {
            return Err(DecodeError::UnknownDiscriminant {
                kind: "block version",
                value: version.min(u32::from(u8::MAX)) as u8,
            });
        }
        let (prev_hash, rest) = UInt256::decode_unfinished(rest)?;
        let (merkle_root, rest) = UInt256::decode_unfinished(rest)?;
        let (timestamp, rest) = u64::decode_unfinished(rest)?;
        let (nonce, rest) = u64::decode_unfinished(rest)?;
        let (index, rest) = u32::decode_unfinished(rest)?;
        let (primary_index, rest) = u8::decode_unfinished(rest)?;
        let (next_consensus, rest) = UInt160::decode_unfinished(rest)?;
        let (witness_count, rest) = neorex_io::decode::read_var_int(rest)?;
        if witness_count != 1 {
            return Err(DecodeError::Custom(format!(
                "header carries {witness_count} witnesses, expected 1"
            )));
        }
        let (witness, rest) = Witness::decode_unfinished(rest)?;
        Ok((
            Self {
                version,
                prev_hash,
                merkle_root,
                timestamp,
                nonce,
                index,
                primary_index,
                next_consensus,
                witness,
            },
            rest,
        ))
    }
}

/// A block: header plus the ordered transaction list the merkle root
/// commits to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn prev_hash(&self) -> UInt256 {
        self.header.prev_hash
    }

    pub fn size(&self) -> usize {
        self.encoded_size()
    }

    /// Merkle root over the transaction hashes in block order; zero when
    /// the block is empty.
    pub fn compute_merkle_root(&self) -> UInt256 {
        let hashes: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .map(|tx| *tx.hash().as_bytes())
            .collect();
        match MerkleTree::compute_root(&hashes) {
            Some(root) => UInt256::from_bytes(root),
            None => UInt256::zero(),
        }
    }

    /// Recomputes and stores the merkle root; the proposer calls this after
    /// filling in transactions.
    pub fn rebuild_merkle_root(&mut self) {
        self.header.merkle_root = self.compute_merkle_root();
    }

    /// Sum of the transactions' system fees, checked against the per-block
    /// cap during verification.
    pub fn total_system_fee(&self) -> i64 {
        self.transactions.iter().map(|tx| tx.system_fee).sum()
    }
}

impl NeoEncode for Block {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.header.encode(buf);
        self.transactions.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        self.header.encoded_size()
            + var_int_size(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(NeoEncode::encoded_size)
                .sum::<usize>()
    }
}

impl NeoDecode for Block {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (header, rest) = Header::decode_unfinished(buf)?;
        let (transactions, rest) =
            decode_var_array::<Transaction>(rest, u16::MAX as usize)?;
        Ok((
            Self {
                header,
                transactions,
            },
            rest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signer;

    fn sample_header(index: u32) -> Header {
        Header {
            version: 0,
            prev_hash: UInt256::hash256_of(b"parent"),
            merkle_root: UInt256::zero(),
            timestamp: 1_600_000_000_000 + u64::from(index),
            nonce: 42,
            index,
            primary_index: 0,
            next_consensus: UInt160::hash160_of(b"committee"),
            witness: Witness::new(vec![], vec![0x11]),
        }
    }

    fn sample_tx(nonce: u32) -> Transaction {
        Transaction {
            nonce,
            network_fee: 100,
            valid_until_block: 10,
            signers: vec![Signer::called_by_entry(UInt160::from_bytes([1; 20]))],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Default::default()
        }
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header(3);
        let encoded = header.encode_to_vec();
        assert_eq!(encoded.len(), header.encoded_size());
        let decoded = Header::decode(&encoded).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn header_hash_excludes_witness() {
        let header = sample_header(3);
        let mut rewitnessed = sample_header(3);
        rewitnessed.witness = Witness::new(vec![0xff], vec![0x12]);
        assert_eq!(header.unsigned_bytes(), rewitnessed.unsigned_bytes());
    }

    #[test]
    fn block_round_trip() {
        let mut block = Block {
            header: sample_header(5),
            transactions: vec![sample_tx(1), sample_tx(2)],
        };
        block.rebuild_merkle_root();
        let encoded = block.encode_to_vec();
        assert_eq!(encoded.len(), block.encoded_size());
        assert_eq!(Block::decode(&encoded).expect("decode"), block);
    }

    #[test]
    fn merkle_root_tracks_transactions() {
        let mut block = Block {
            header: sample_header(1),
            transactions: vec![sample_tx(1)],
        };
        block.rebuild_merkle_root();
        let one_tx_root = block.header.merkle_root;
        assert_ne!(one_tx_root, UInt256::zero());

        block.transactions.push(sample_tx(2));
        block.rebuild_merkle_root();
        assert_ne!(block.header.merkle_root, one_tx_root);
    }

    #[test]
    fn empty_block_has_zero_root() {
        let block = Block {
            header: sample_header(1),
            transactions: Vec::new(),
        };
        assert_eq!(block.compute_merkle_root(), UInt256::zero());
    }

    #[test]
    fn header_rejects_multi_witness() {
        let header = sample_header(2);
        let mut buf = Vec::new();
        header.encode_unsigned(&mut buf);
        neorex_io::encode::write_var_int(2, &mut buf);
        header.witness.encode(&mut buf);
        header.witness.encode(&mut buf);
        assert!(Header::decode(&buf).is_err());
    }
}

use bytes::BufMut;
use neorex_io::{
    decode::{decode_var_array, read_var_bytes},
    encode::{var_bytes_size, var_int_size, write_var_bytes},
    DecodeError, NeoDecode, NeoEncode,
};

use crate::constants::{
    MAX_TRANSACTION_ATTRIBUTES, MAX_TRANSACTION_SIGNERS, MAX_TRANSACTION_SIZE,
};

use super::{Signer, TransactionAttribute, UInt160, UInt256, Witness};

const MAX_SCRIPT_SIZE: usize = 0xffff;

/// A ledger transaction.
///
/// Identity is `hash256` over the unsigned fields; witnesses authorize the
/// signers in order and never feed the hash. Once hashed, the value is
/// treated as immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    pub system_fee: i64,
    pub network_fee: i64,
    pub valid_until_block: u32,
    pub signers: Vec<Signer>,
    pub attributes: Vec<TransactionAttribute>,
    pub script: Vec<u8>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    pub fn hash(&self) -> UInt256 {
        UInt256::hash256_of(&self.unsigned_bytes())
    }

    /// Serialization of everything the hash covers.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_unsigned(&mut buf);
        buf
    }

    fn encode_unsigned(&self, buf: &mut dyn BufMut) {
        self.version.encode(buf);
        self.nonce.encode(buf);
        self.system_fee.encode(buf);
        self.network_fee.encode(buf);
        self.valid_until_block.encode(buf);
        self.signers.encode(buf);
        self.attributes.encode(buf);
        write_var_bytes(&self.script, buf);
    }

    /// The fee payer.
    pub fn sender(&self) -> Option<UInt160> {
        self.signers.first().map(|signer| signer.account)
    }

    pub fn size(&self) -> usize {
        self.encoded_size()
    }

    /// Network fee divided by serialized size, the mempool ordering key.
    pub fn fee_per_byte(&self) -> i64 {
        let size = self.size() as i64;
        if size == 0 {
            return 0;
        }
        self.network_fee / size
    }

    pub fn is_high_priority(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, TransactionAttribute::HighPriority))
    }

    /// Hashes this transaction declares conflict with.
    pub fn conflicts(&self) -> impl Iterator<Item = UInt256> + '_ {
        self.attributes.iter().filter_map(|attribute| match attribute {
            TransactionAttribute::Conflicts { hash } => Some(*hash),
            _ => None,
        })
    }

    pub fn not_valid_before(&self) -> Option<u32> {
        self.attributes.iter().find_map(|attribute| match attribute {
            TransactionAttribute::NotValidBefore { height } => Some(*height),
            _ => None,
        })
    }

    /// Structural checks that need no chain state: performed on decode's
    /// output before a transaction is let anywhere near the pool.
    fn check_shape(&self) -> Result<(), DecodeError> {
        if self.signers.is_empty() {
            return Err(DecodeError::Custom("transaction has no signers".into()));
        }
        if self.script.is_empty() {
            return Err(DecodeError::Custom("transaction script is empty".into()));
        }
        for (i, signer) in self.signers.iter().enumerate() {
            if self.signers[..i].iter().any(|s| s.account == signer.account) {
                return Err(DecodeError::Custom(format!(
                    "duplicate signer {}",
                    signer.account
                )));
            }
        }
        let mut seen_types = Vec::new();
        for attribute in &self.attributes {
            let ty = attribute.attribute_type();
            if !attribute.allows_multiple() && seen_types.contains(&ty) {
                return Err(DecodeError::Custom(format!(
                    "duplicate attribute type {ty:#04x}"
                )));
            }
            seen_types.push(ty);
        }
        if self.witnesses.len() != self.signers.len() {
            return Err(DecodeError::Custom(format!(
                "expected {} witnesses, got {}",
                self.signers.len(),
                self.witnesses.len()
            )));
        }
        Ok(())
    }
}

impl NeoEncode for Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.encode_unsigned(buf);
        self.witnesses.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        1 + 4
            + 8
            + 8
            + 4
            + self.signers.encoded_size()
            + self.attributes.encoded_size()
            + var_bytes_size(self.script.len())
            + var_int_size(self.witnesses.len() as u64)
            + self
                .witnesses
                .iter()
                .map(NeoEncode::encoded_size)
                .sum::<usize>()
    }
}

impl NeoDecode for Transaction {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (version, rest) = u8::decode_unfinished(buf)?;
        if version != 0 {
            return Err(DecodeError::UnknownDiscriminant {
                kind: "transaction version",
                value: version,
            });
        }
        let (nonce, rest) = u32::decode_unfinished(rest)?;
        let (system_fee, rest) = i64::decode_unfinished(rest)?;
        if system_fee < 0 {
            return Err(DecodeError::Custom("negative system fee".into()));
        }
        let (network_fee, rest) = i64::decode_unfinished(rest)?;
        if network_fee < 0 {
            return Err(DecodeError::Custom("negative network fee".into()));
        }
        let (valid_until_block, rest) = u32::decode_unfinished(rest)?;
        let (signers, rest) = decode_var_array::<Signer>(rest, MAX_TRANSACTION_SIGNERS)?;
        let (attributes, rest) =
            decode_var_array::<TransactionAttribute>(rest, MAX_TRANSACTION_ATTRIBUTES)?;
        let (script, rest) = read_var_bytes(rest, MAX_SCRIPT_SIZE)?;
        let (witnesses, rest) = decode_var_array::<Witness>(rest, MAX_TRANSACTION_SIGNERS)?;

        let tx = Self {
            version,
            nonce,
            system_fee,
            network_fee,
            valid_until_block,
            signers,
            attributes,
            script,
            witnesses,
        };
        tx.check_shape()?;
        if tx.size() > MAX_TRANSACTION_SIZE {
            return Err(DecodeError::LengthCap {
                declared: tx.size() as u64,
                cap: MAX_TRANSACTION_SIZE,
            });
        }
        Ok((tx, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_transaction(nonce: u32) -> Transaction {
        Transaction {
            version: 0,
            nonce,
            system_fee: 100,
            network_fee: 200_000,
            valid_until_block: 1000,
            signers: vec![Signer::called_by_entry(UInt160::from_bytes([7; 20]))],
            attributes: Vec::new(),
            script: vec![0x40],
            witnesses: vec![Witness::new(vec![0x0c, 0x02], vec![0x51])],
            ..Default::default()
        }
    }

    #[test]
    fn round_trip() {
        let tx = sample_transaction(1);
        let encoded = tx.encode_to_vec();
        assert_eq!(encoded.len(), tx.encoded_size());
        let decoded = Transaction::decode(&encoded).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn hash_ignores_witnesses() {
        let tx = sample_transaction(1);
        let mut stripped = tx.clone();
        stripped.witnesses = vec![Witness::default()];
        // Same unsigned fields, different witness: identical hash.
        assert_eq!(
            UInt256::hash256_of(&tx.unsigned_bytes()),
            UInt256::hash256_of(&stripped.unsigned_bytes())
        );
    }

    #[test]
    fn hash_changes_with_nonce() {
        assert_ne!(sample_transaction(1).hash(), sample_transaction(2).hash());
    }

    #[test]
    fn rejects_empty_script() {
        let mut tx = sample_transaction(1);
        tx.script = Vec::new();
        let encoded = tx.encode_to_vec();
        assert!(Transaction::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_no_signers() {
        let mut tx = sample_transaction(1);
        tx.signers = Vec::new();
        tx.witnesses = Vec::new();
        let encoded = tx.encode_to_vec();
        assert!(Transaction::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_witness_count_mismatch() {
        let mut tx = sample_transaction(1);
        tx.witnesses.push(Witness::default());
        let encoded = tx.encode_to_vec();
        assert!(Transaction::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_negative_fees() {
        let mut tx = sample_transaction(1);
        tx.network_fee = -1;
        let encoded = tx.encode_to_vec();
        assert!(Transaction::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_duplicate_signers() {
        let mut tx = sample_transaction(1);
        tx.signers.push(tx.signers[0].clone());
        tx.witnesses.push(Witness::default());
        let encoded = tx.encode_to_vec();
        assert!(Transaction::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut encoded = sample_transaction(1).encode_to_vec();
        encoded.push(0xff);
        assert!(matches!(
            Transaction::decode(&encoded),
            Err(DecodeError::TrailingBytes)
        ));
    }

    #[test]
    fn conflicts_are_surfaced() {
        let rival = UInt256::hash256_of(b"rival");
        let mut tx = sample_transaction(1);
        tx.attributes.push(TransactionAttribute::Conflicts { hash: rival });
        assert_eq!(tx.conflicts().collect::<Vec<_>>(), vec![rival]);
    }
}

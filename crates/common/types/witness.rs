use bytes::BufMut;
use neorex_io::{
    decode::read_var_bytes,
    encode::{var_bytes_size, write_var_bytes},
    DecodeError, NeoDecode, NeoEncode,
};

use crate::constants::{MAX_INVOCATION_SCRIPT, MAX_VERIFICATION_SCRIPT};

use super::UInt160;

/// Authorization proof for a signer or a block.
///
/// `invocation` pushes the signatures, `verification` is the script they
/// satisfy. An empty `verification` means the account resolves to a deployed
/// contract and its `verify` method is consulted instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

impl Witness {
    pub fn new(invocation: Vec<u8>, verification: Vec<u8>) -> Self {
        Self {
            invocation,
            verification,
        }
    }

    /// The account this witness can authorize, when it carries its own
    /// verification script.
    pub fn script_hash(&self) -> Option<UInt160> {
        if self.verification.is_empty() {
            None
        } else {
            Some(UInt160::hash160_of(&self.verification))
        }
    }
}

impl NeoEncode for Witness {
    fn encode(&self, buf: &mut dyn BufMut) {
        write_var_bytes(&self.invocation, buf);
        write_var_bytes(&self.verification, buf);
    }

    fn encoded_size(&self) -> usize {
        var_bytes_size(self.invocation.len()) + var_bytes_size(self.verification.len())
    }
}

impl NeoDecode for Witness {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (invocation, rest) = read_var_bytes(buf, MAX_INVOCATION_SCRIPT)?;
        let (verification, rest) = read_var_bytes(rest, MAX_VERIFICATION_SCRIPT)?;
        Ok((
            Self {
                invocation,
                verification,
            },
            rest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_io::encode::write_var_int;

    #[test]
    fn round_trip() {
        let witness = Witness::new(vec![0x0c, 0x40, 0xaa], vec![0x0c, 0x21, 0xbb]);
        let encoded = witness.encode_to_vec();
        assert_eq!(encoded.len(), witness.encoded_size());
        assert_eq!(Witness::decode(&encoded).expect("decode"), witness);
    }

    #[test]
    fn empty_verification_has_no_script_hash() {
        let witness = Witness::new(vec![1, 2, 3], vec![]);
        assert_eq!(witness.script_hash(), None);
    }

    #[test]
    fn oversize_invocation_rejected() {
        let mut buf = Vec::new();
        write_var_int((MAX_INVOCATION_SCRIPT + 1) as u64, &mut buf);
        buf.extend(std::iter::repeat(0u8).take(MAX_INVOCATION_SCRIPT + 1));
        write_var_bytes(&[], &mut buf);
        assert!(matches!(
            Witness::decode(&buf),
            Err(DecodeError::LengthCap { .. })
        ));
    }
}

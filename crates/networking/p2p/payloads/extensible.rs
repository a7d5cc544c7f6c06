use bytes::BufMut;
use neorex_common::signing::signing_data;
use neorex_common::types::{UInt160, UInt256, Witness};
use neorex_io::{
    decode::{read_var_bytes, read_var_string},
    encode::{write_var_bytes, write_var_string},
    DecodeError, NeoDecode, NeoEncode,
};

const MAX_CATEGORY: usize = 32;
const MAX_DATA: usize = 0x0400_0000;

/// Generic signed envelope for protocol extensions; consensus rides in it
/// under the `"dBFT"` category. The witness authorizes `sender` over the
/// hash of everything before it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensiblePayload {
    pub category: String,
    /// Height window in which the payload is relayed and accepted.
    pub valid_block_start: u32,
    pub valid_block_end: u32,
    pub sender: UInt160,
    pub data: Vec<u8>,
    pub witness: Witness,
}

impl ExtensiblePayload {
    pub fn hash(&self) -> UInt256 {
        UInt256::hash256_of(&self.unsigned_bytes())
    }

    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_unsigned(&mut buf);
        buf
    }

    fn encode_unsigned(&self, buf: &mut dyn BufMut) {
        write_var_string(&self.category, buf);
        self.valid_block_start.encode(buf);
        self.valid_block_end.encode(buf);
        self.sender.encode(buf);
        write_var_bytes(&self.data, buf);
    }

    /// The message every signature over this payload covers.
    pub fn signing_message(&self, network_magic: u32) -> [u8; 36] {
        signing_data(network_magic, &self.hash())
    }

    pub fn is_valid_at(&self, height: u32) -> bool {
        self.valid_block_start <= height && height < self.valid_block_end
    }
}

impl NeoEncode for ExtensiblePayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.encode_unsigned(buf);
        // Framed as a one-element witness array like block headers.
        neorex_io::encode::write_var_int(1, buf);
        self.witness.encode(buf);
    }
}

impl NeoDecode for ExtensiblePayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (category, rest) = read_var_string(buf, MAX_CATEGORY)?;
        let (valid_block_start, rest) = u32::decode_unfinished(rest)?;
        let (valid_block_end, rest) = u32::decode_unfinished(rest)?;
        if valid_block_start >= valid_block_end {
            return Err(DecodeError::Custom(
                "empty extensible validity window".into(),
            ));
        }
        let (sender, rest) = UInt160::decode_unfinished(rest)?;
        let (data, rest) = read_var_bytes(rest, MAX_DATA)?;
        let (witness_count, rest) = neorex_io::decode::read_var_int(rest)?;
        if witness_count != 1 {
            return Err(DecodeError::Custom(format!(
                "extensible payload carries {witness_count} witnesses, expected 1"
            )));
        }
        let (witness, rest) = Witness::decode_unfinished(rest)?;
        Ok((
            Self {
                category,
                valid_block_start,
                valid_block_end,
                sender,
                data,
                witness,
            },
            rest,
        ))
    }
}

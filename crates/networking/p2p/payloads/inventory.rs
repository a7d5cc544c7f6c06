use bytes::BufMut;
use neorex_common::types::UInt256;
use neorex_io::{decode::decode_var_array, DecodeError, NeoDecode, NeoEncode};

const MAX_INV_HASHES: usize = 500;

/// What an `inv`/`getdata`/`notfound` frame is about. The discriminants
/// deliberately match the corresponding message commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InventoryType {
    Transaction = 0x2b,
    Block = 0x2c,
    Extensible = 0x2e,
}

impl InventoryType {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x2b => Ok(Self::Transaction),
            0x2c => Ok(Self::Block),
            0x2e => Ok(Self::Extensible),
            other => Err(DecodeError::UnknownDiscriminant {
                kind: "inventory type",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub inventory_type: InventoryType,
    pub hashes: Vec<UInt256>,
}

impl InvPayload {
    pub fn single(inventory_type: InventoryType, hash: UInt256) -> Self {
        Self {
            inventory_type,
            hashes: vec![hash],
        }
    }
}

impl NeoEncode for InvPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.inventory_type as u8);
        self.hashes.encode(buf);
    }
}

impl NeoDecode for InvPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (type_byte, rest) = u8::decode_unfinished(buf)?;
        let inventory_type = InventoryType::from_byte(type_byte)?;
        let (hashes, rest) = decode_var_array(rest, MAX_INV_HASHES)?;
        if hashes.is_empty() {
            return Err(DecodeError::Custom("empty inventory".into()));
        }
        Ok((
            Self {
                inventory_type,
                hashes,
            },
            rest,
        ))
    }
}

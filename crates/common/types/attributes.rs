use bytes::BufMut;
use neorex_io::{
    decode::read_var_bytes, encode::write_var_bytes, DecodeError, NeoDecode, NeoEncode,
};

use crate::constants::MAX_ORACLE_RESULT;

use super::UInt256;

/// Result code carried by an oracle response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OracleResponseCode {
    Success = 0x00,
    ProtocolNotSupported = 0x10,
    ConsensusUnreachable = 0x12,
    NotFound = 0x14,
    Timeout = 0x16,
    Forbidden = 0x18,
    ResponseTooLarge = 0x1a,
    InsufficientFunds = 0x1c,
    ContentTypeNotSupported = 0x1f,
    Error = 0xff,
}

impl OracleResponseCode {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0x00 => Self::Success,
            0x10 => Self::ProtocolNotSupported,
            0x12 => Self::ConsensusUnreachable,
            0x14 => Self::NotFound,
            0x16 => Self::Timeout,
            0x18 => Self::Forbidden,
            0x1a => Self::ResponseTooLarge,
            0x1c => Self::InsufficientFunds,
            0x1f => Self::ContentTypeNotSupported,
            0xff => Self::Error,
            other => {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "oracle response code",
                    value: other,
                })
            }
        })
    }
}

/// Transaction attributes. Unknown discriminants fail decoding; peers
/// relaying them are scored for it upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAttribute {
    /// Committee-signed transactions jump the fee ordering.
    HighPriority,
    /// Oracle callback carrying the fetched result.
    OracleResponse {
        id: u64,
        code: OracleResponseCode,
        result: Vec<u8>,
    },
    /// The transaction is invalid before the given height.
    NotValidBefore { height: u32 },
    /// Admitting this transaction evicts / blocks the named hash.
    Conflicts { hash: UInt256 },
}

impl TransactionAttribute {
    const HIGH_PRIORITY: u8 = 0x01;
    const ORACLE_RESPONSE: u8 = 0x11;
    const NOT_VALID_BEFORE: u8 = 0x20;
    const CONFLICTS: u8 = 0x21;

    pub fn attribute_type(&self) -> u8 {
        match self {
            Self::HighPriority => Self::HIGH_PRIORITY,
            Self::OracleResponse { .. } => Self::ORACLE_RESPONSE,
            Self::NotValidBefore { .. } => Self::NOT_VALID_BEFORE,
            Self::Conflicts { .. } => Self::CONFLICTS,
        }
    }

    /// Only `Conflicts` may appear more than once per transaction.
    pub fn allows_multiple(&self) -> bool {
        matches!(self, Self::Conflicts { .. })
    }
}

impl NeoEncode for TransactionAttribute {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.attribute_type());
        match self {
            Self::HighPriority => {}
            Self::OracleResponse { id, code, result } => {
                id.encode(buf);
                buf.put_u8(*code as u8);
                write_var_bytes(result, buf);
            }
            Self::NotValidBefore { height } => height.encode(buf),
            Self::Conflicts { hash } => hash.encode(buf),
        }
    }
}

impl NeoDecode for TransactionAttribute {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (discriminant, rest) = u8::decode_unfinished(buf)?;
        match discriminant {
            Self::HIGH_PRIORITY => Ok((Self::HighPriority, rest)),
            Self::ORACLE_RESPONSE => {
                let (id, rest) = u64::decode_unfinished(rest)?;
                let (code_byte, rest) = u8::decode_unfinished(rest)?;
                let code = OracleResponseCode::from_byte(code_byte)?;
                let (result, rest) = read_var_bytes(rest, MAX_ORACLE_RESULT)?;
                if code != OracleResponseCode::Success && !result.is_empty() {
                    return Err(DecodeError::Custom(
                        "oracle response result must be empty for non-success codes".into(),
                    ));
                }
                Ok((Self::OracleResponse { id, code, result }, rest))
            }
            Self::NOT_VALID_BEFORE => {
                let (height, rest) = u32::decode_unfinished(rest)?;
                Ok((Self::NotValidBefore { height }, rest))
            }
            Self::CONFLICTS => {
                let (hash, rest) = UInt256::decode_unfinished(rest)?;
                Ok((Self::Conflicts { hash }, rest))
            }
            other => Err(DecodeError::UnknownDiscriminant {
                kind: "transaction attribute",
                value: other,
            }),
        }
    }
}

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use neorex_io::{DecodeError, NeoDecode, NeoEncode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// 160-bit identity: script hashes and account addresses.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UInt160(pub [u8; 20]);

/// 256-bit identity: block and transaction hashes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UInt256(pub [u8; 32]);

macro_rules! impl_uint {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(slice: &[u8]) -> Result<Self, DecodeError> {
                if slice.len() != $len {
                    return Err(DecodeError::Custom(format!(
                        concat!(stringify!($name), " expects {} bytes, got {}"),
                        $len,
                        slice.len()
                    )));
                }
                let mut bytes = [0u8; $len];
                bytes.copy_from_slice(slice);
                Ok(Self(bytes))
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl NeoEncode for $name {
            fn encode(&self, buf: &mut dyn BufMut) {
                buf.put_slice(&self.0);
            }

            fn encoded_size(&self) -> usize {
                $len
            }
        }

        impl NeoDecode for $name {
            fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
                let (bytes, rest) = <[u8; $len]>::decode_unfinished(buf)?;
                Ok((Self(bytes), rest))
            }
        }

        // Hashes display reversed with an `0x` prefix, the convention the
        // reference network uses everywhere user-facing.
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                write!(f, "0x{}", hex::encode(reversed))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self}")
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let stripped = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(stripped, &mut bytes).map_err(|_| {
                    DecodeError::Custom(format!(concat!("invalid ", stringify!($name), ": {}"), s))
                })?;
                bytes.reverse();
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

impl_uint!(UInt160, 20);
impl_uint!(UInt256, 32);

impl UInt256 {
    /// Hash of `data` under the ledger identity function.
    pub fn hash256_of(data: &[u8]) -> Self {
        Self(neorex_crypto::hash256(data))
    }
}

impl UInt160 {
    /// Script hash of `script`.
    pub fn hash160_of(script: &[u8]) -> Self {
        Self(neorex_crypto::hash160(script))
    }
}

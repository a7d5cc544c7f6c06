use bytes::BufMut;
use neorex_common::types::{Header, UInt256};
use neorex_io::{decode::decode_var_array, DecodeError, NeoDecode, NeoEncode};

/// Batch size servers cap header responses at.
pub const MAX_HEADERS_COUNT: usize = 2_000;

/// `getheaders` / `getblockbyindex`: a start index and a count, where
/// `-1` (encoded as `0xffff`) means "as many as you will give me".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlockByIndexPayload {
    pub index_start: u32,
    pub count: i16,
}

impl GetBlockByIndexPayload {
    pub fn effective_count(&self, cap: usize) -> usize {
        if self.count < 0 {
            cap
        } else {
            (self.count as usize).min(cap)
        }
    }
}

impl NeoEncode for GetBlockByIndexPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.index_start.encode(buf);
        buf.put_i16_le(self.count);
    }

    fn encoded_size(&self) -> usize {
        6
    }
}

impl NeoDecode for GetBlockByIndexPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (index_start, rest) = u32::decode_unfinished(buf)?;
        let (count_bytes, rest) = <[u8; 2]>::decode_unfinished(rest)?;
        let count = i16::from_le_bytes(count_bytes);
        if count < -1 || count == 0 {
            return Err(DecodeError::Custom(format!("invalid count {count}")));
        }
        Ok((Self { index_start, count }, rest))
    }
}

/// Legacy hash-based locator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlocksPayload {
    pub hash_start: UInt256,
    pub count: i16,
}

impl NeoEncode for GetBlocksPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.hash_start.encode(buf);
        buf.put_i16_le(self.count);
    }
}

impl NeoDecode for GetBlocksPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (hash_start, rest) = UInt256::decode_unfinished(buf)?;
        let (count_bytes, rest) = <[u8; 2]>::decode_unfinished(rest)?;
        let count = i16::from_le_bytes(count_bytes);
        if count < -1 || count == 0 {
            return Err(DecodeError::Custom(format!("invalid count {count}")));
        }
        Ok((Self { hash_start, count }, rest))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

impl NeoEncode for HeadersPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.headers.encode(buf);
    }
}

impl NeoDecode for HeadersPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (headers, rest) = decode_var_array(buf, MAX_HEADERS_COUNT)?;
        Ok((Self { headers }, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_block_by_index_round_trip() {
        for count in [-1i16, 1, 500] {
            let payload = GetBlockByIndexPayload {
                index_start: 77,
                count,
            };
            let encoded = payload.encode_to_vec();
            assert_eq!(
                GetBlockByIndexPayload::decode(&encoded).expect("decode"),
                payload
            );
        }
    }

    #[test]
    fn zero_and_negative_counts_rejected() {
        for count in [0i16, -2] {
            let mut encoded = 7u32.encode_to_vec();
            encoded.extend_from_slice(&count.to_le_bytes());
            assert!(GetBlockByIndexPayload::decode(&encoded).is_err());
        }
    }

    #[test]
    fn effective_count_clamps() {
        let unbounded = GetBlockByIndexPayload {
            index_start: 0,
            count: -1,
        };
        assert_eq!(unbounded.effective_count(2_000), 2_000);
        let bounded = GetBlockByIndexPayload {
            index_start: 0,
            count: 10,
        };
        assert_eq!(bounded.effective_count(2_000), 10);
    }
}

use bytes::BufMut;
use neorex_io::{DecodeError, NeoDecode, NeoEncode};

/// Ping and pong share one shape; pong echoes the ping's nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    pub last_block_index: u32,
    pub timestamp: u32,
    pub nonce: u32,
}

impl NeoEncode for PingPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.last_block_index.encode(buf);
        self.timestamp.encode(buf);
        self.nonce.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        12
    }
}

impl NeoDecode for PingPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (last_block_index, rest) = u32::decode_unfinished(buf)?;
        let (timestamp, rest) = u32::decode_unfinished(rest)?;
        let (nonce, rest) = u32::decode_unfinished(rest)?;
        Ok((
            Self {
                last_block_index,
                timestamp,
                nonce,
            },
            rest,
        ))
    }
}

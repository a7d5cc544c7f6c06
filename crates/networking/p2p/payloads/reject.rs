use bytes::BufMut;
use neorex_io::{
    decode::read_var_string, encode::write_var_string, DecodeError, NeoDecode, NeoEncode,
};

const MAX_REASON: usize = 256;

/// Sent before a deliberate disconnect so the peer knows why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectPayload {
    /// Command byte of the offending message, if any.
    pub command: u8,
    pub reason: String,
}

impl RejectPayload {
    pub fn new(command: u8, reason: impl Into<String>) -> Self {
        Self {
            command,
            reason: reason.into(),
        }
    }
}

impl NeoEncode for RejectPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.command);
        write_var_string(&self.reason, buf);
    }
}

impl NeoDecode for RejectPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (command, rest) = u8::decode_unfinished(buf)?;
        let (reason, rest) = read_var_string(rest, MAX_REASON)?;
        Ok((Self { command, reason }, rest))
    }
}

use bytes::BufMut;
use neorex_io::{
    decode::{decode_var_array, read_var_string},
    encode::write_var_string,
    DecodeError, NeoDecode, NeoEncode,
};

const MAX_USER_AGENT: usize = 1024;
const MAX_CAPABILITIES: usize = 32;

/// Capabilities a peer advertises after the version exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCapability {
    /// Accepting inbound connections on the given port.
    TcpServer { port: u16 },
    /// Full chain data available from the given height.
    FullNode { start_height: u32 },
    /// Never send this peer compressed payloads.
    DisableCompression,
}

impl NodeCapability {
    const TCP_SERVER: u8 = 0x01;
    const DISABLE_COMPRESSION: u8 = 0x03;
    const FULL_NODE: u8 = 0x10;
}

impl NeoEncode for NodeCapability {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Self::TcpServer { port } => {
                buf.put_u8(Self::TCP_SERVER);
                port.encode(buf);
            }
            Self::DisableCompression => buf.put_u8(Self::DISABLE_COMPRESSION),
            Self::FullNode { start_height } => {
                buf.put_u8(Self::FULL_NODE);
                start_height.encode(buf);
            }
        }
    }
}

impl NeoDecode for NodeCapability {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (discriminant, rest) = u8::decode_unfinished(buf)?;
        match discriminant {
            Self::TCP_SERVER => {
                let (port, rest) = u16::decode_unfinished(rest)?;
                Ok((Self::TcpServer { port }, rest))
            }
            Self::DISABLE_COMPRESSION => Ok((Self::DisableCompression, rest)),
            Self::FULL_NODE => {
                let (start_height, rest) = u32::decode_unfinished(rest)?;
                Ok((Self::FullNode { start_height }, rest))
            }
            other => Err(DecodeError::UnknownDiscriminant {
                kind: "node capability",
                value: other,
            }),
        }
    }
}

/// The handshake opener. Field order is fixed by the wire protocol:
/// magic, version, timestamp, nonce, user agent, capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub magic: u32,
    pub version: u32,
    pub timestamp: u32,
    /// Random per-process nonce; seeing our own nonce back means we dialed
    /// ourselves.
    pub nonce: u32,
    pub user_agent: String,
    pub capabilities: Vec<NodeCapability>,
}

impl VersionPayload {
    pub fn start_height(&self) -> Option<u32> {
        self.capabilities.iter().find_map(|cap| match cap {
            NodeCapability::FullNode { start_height } => Some(*start_height),
            _ => None,
        })
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.capabilities.iter().find_map(|cap| match cap {
            NodeCapability::TcpServer { port } => Some(*port),
            _ => None,
        })
    }

    pub fn compression_disabled(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| matches!(cap, NodeCapability::DisableCompression))
    }
}

impl NeoEncode for VersionPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.magic.encode(buf);
        self.version.encode(buf);
        self.timestamp.encode(buf);
        self.nonce.encode(buf);
        write_var_string(&self.user_agent, buf);
        self.capabilities.encode(buf);
    }
}

impl NeoDecode for VersionPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (magic, rest) = u32::decode_unfinished(buf)?;
        let (version, rest) = u32::decode_unfinished(rest)?;
        let (timestamp, rest) = u32::decode_unfinished(rest)?;
        let (nonce, rest) = u32::decode_unfinished(rest)?;
        let (user_agent, rest) = read_var_string(rest, MAX_USER_AGENT)?;
        let (capabilities, rest) = decode_var_array(rest, MAX_CAPABILITIES)?;
        Ok((
            Self {
                magic,
                version,
                timestamp,
                nonce,
                user_agent,
                capabilities,
            },
            rest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let payload = VersionPayload {
            magic: 860_833_102,
            version: 0,
            timestamp: 1_700_000_000,
            nonce: 0xabcd_ef01,
            user_agent: "/neorex:0.1.0/".into(),
            capabilities: vec![
                NodeCapability::TcpServer { port: 10333 },
                NodeCapability::FullNode { start_height: 123 },
            ],
        };
        let encoded = payload.encode_to_vec();
        let decoded = VersionPayload::decode(&encoded).expect("decode");
        assert_eq!(decoded, payload);
        assert_eq!(decoded.start_height(), Some(123));
        assert_eq!(decoded.listen_port(), Some(10333));
        assert!(!decoded.compression_disabled());
    }

    #[test]
    fn unknown_capability_rejected() {
        let payload = VersionPayload {
            magic: 1,
            version: 0,
            timestamp: 0,
            nonce: 0,
            user_agent: String::new(),
            capabilities: Vec::new(),
        };
        let mut encoded = payload.encode_to_vec();
        // Rewrite the empty capability list into one unknown entry.
        let last = encoded.len() - 1;
        encoded[last] = 1;
        encoded.push(0x7f);
        assert!(VersionPayload::decode(&encoded).is_err());
    }
}

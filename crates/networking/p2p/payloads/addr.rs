use std::net::{IpAddr, Ipv6Addr};

use bytes::BufMut;
use neorex_io::{decode::decode_var_array, DecodeError, NeoDecode, NeoEncode};

use super::version::NodeCapability;

const MAX_ADDR_ENTRIES: usize = 200;
const MAX_CAPABILITIES: usize = 32;

/// One known peer: last-seen time, address, and its capabilities.
/// Addresses travel as 16 bytes; IPv4 is mapped per RFC 4291.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub timestamp: u32,
    pub address: IpAddr,
    pub capabilities: Vec<NodeCapability>,
}

impl NetworkAddress {
    pub fn port(&self) -> Option<u16> {
        self.capabilities.iter().find_map(|cap| match cap {
            NodeCapability::TcpServer { port } => Some(*port),
            _ => None,
        })
    }

    fn to_v6_bytes(&self) -> [u8; 16] {
        match self.address {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    fn from_v6_bytes(bytes: [u8; 16]) -> IpAddr {
        let v6 = Ipv6Addr::from(bytes);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }
}

impl NeoEncode for NetworkAddress {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.timestamp.encode(buf);
        buf.put_slice(&self.to_v6_bytes());
        self.capabilities.encode(buf);
    }
}

impl NeoDecode for NetworkAddress {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (timestamp, rest) = u32::decode_unfinished(buf)?;
        let (address_bytes, rest) = <[u8; 16]>::decode_unfinished(rest)?;
        let (capabilities, rest) = decode_var_array(rest, MAX_CAPABILITIES)?;
        Ok((
            Self {
                timestamp,
                address: Self::from_v6_bytes(address_bytes),
                capabilities,
            },
            rest,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddrPayload {
    pub addresses: Vec<NetworkAddress>,
}

impl NeoEncode for AddrPayload {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.addresses.encode(buf);
    }
}

impl NeoDecode for AddrPayload {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (addresses, rest) = decode_var_array(buf, MAX_ADDR_ENTRIES)?;
        Ok((Self { addresses }, rest))
    }
}

//! Wire framing: `flags:u8 || command:u8 || var_bytes(payload)`.
//!
//! Payloads of relay-heavy commands are LZ4-compressed when it actually
//! pays: raw size at least [`COMPRESSION_MIN_SIZE`] and a saving of at
//! least [`COMPRESSION_THRESHOLD`] bytes, otherwise the flag is cleared
//! and the raw bytes go out. The compressed form carries a u32
//! little-endian uncompressed-size prefix, checked against the frame cap
//! before decompression.

use bytes::BufMut;
use neorex_common::types::{Block, Transaction};
use neorex_io::{
    decode::read_var_bytes,
    encode::write_var_bytes,
    DecodeError, NeoDecode, NeoEncode,
};

use crate::error::NetworkError;
use crate::payloads::{
    AddrPayload, ExtensiblePayload, GetBlockByIndexPayload, GetBlocksPayload, HeadersPayload,
    InvPayload, PingPayload, RejectPayload, VersionPayload,
};

/// Hard cap on a frame's payload, compressed or raw.
pub const PAYLOAD_MAX_SIZE: usize = 0x0200_0000;

pub const COMPRESSION_MIN_SIZE: usize = 128;
pub const COMPRESSION_THRESHOLD: usize = 32;

const FLAG_NONE: u8 = 0x00;
const FLAG_COMPRESSED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageCommand {
    Version = 0x00,
    Verack = 0x01,
    GetAddr = 0x10,
    Addr = 0x11,
    Ping = 0x18,
    Pong = 0x19,
    GetHeaders = 0x20,
    Headers = 0x21,
    GetBlocks = 0x24,
    Mempool = 0x25,
    Inv = 0x27,
    GetData = 0x28,
    GetBlockByIndex = 0x29,
    NotFound = 0x2a,
    Transaction = 0x2b,
    Block = 0x2c,
    Extensible = 0x2e,
    Reject = 0x2f,
}

impl MessageCommand {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0x00 => Self::Version,
            0x01 => Self::Verack,
            0x10 => Self::GetAddr,
            0x11 => Self::Addr,
            0x18 => Self::Ping,
            0x19 => Self::Pong,
            0x20 => Self::GetHeaders,
            0x21 => Self::Headers,
            0x24 => Self::GetBlocks,
            0x25 => Self::Mempool,
            0x27 => Self::Inv,
            0x28 => Self::GetData,
            0x29 => Self::GetBlockByIndex,
            0x2a => Self::NotFound,
            0x2b => Self::Transaction,
            0x2c => Self::Block,
            0x2e => Self::Extensible,
            0x2f => Self::Reject,
            other => {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "message command",
                    value: other,
                })
            }
        })
    }

    /// Commands whose payloads are worth compressing on the wire.
    pub fn is_compressible(self) -> bool {
        matches!(
            self,
            Self::Block
                | Self::Extensible
                | Self::Transaction
                | Self::Headers
                | Self::Addr
        )
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    GetAddr,
    Addr(AddrPayload),
    Ping(PingPayload),
    Pong(PingPayload),
    GetHeaders(GetBlockByIndexPayload),
    Headers(HeadersPayload),
    GetBlocks(GetBlocksPayload),
    GetBlockByIndex(GetBlockByIndexPayload),
    Mempool,
    Inv(InvPayload),
    GetData(InvPayload),
    NotFound(InvPayload),
    Transaction(Transaction),
    Block(Block),
    Extensible(ExtensiblePayload),
    Reject(RejectPayload),
}

impl Message {
    pub fn command(&self) -> MessageCommand {
        match self {
            Message::Version(_) => MessageCommand::Version,
            Message::Verack => MessageCommand::Verack,
            Message::GetAddr => MessageCommand::GetAddr,
            Message::Addr(_) => MessageCommand::Addr,
            Message::Ping(_) => MessageCommand::Ping,
            Message::Pong(_) => MessageCommand::Pong,
            Message::GetHeaders(_) => MessageCommand::GetHeaders,
            Message::Headers(_) => MessageCommand::Headers,
            Message::GetBlocks(_) => MessageCommand::GetBlocks,
            Message::GetBlockByIndex(_) => MessageCommand::GetBlockByIndex,
            Message::Mempool => MessageCommand::Mempool,
            Message::Inv(_) => MessageCommand::Inv,
            Message::GetData(_) => MessageCommand::GetData,
            Message::NotFound(_) => MessageCommand::NotFound,
            Message::Transaction(_) => MessageCommand::Transaction,
            Message::Block(_) => MessageCommand::Block,
            Message::Extensible(_) => MessageCommand::Extensible,
            Message::Reject(_) => MessageCommand::Reject,
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match self {
            Message::Verack | Message::GetAddr | Message::Mempool => Vec::new(),
            Message::Version(p) => p.encode_to_vec(),
            Message::Addr(p) => p.encode_to_vec(),
            Message::Ping(p) | Message::Pong(p) => p.encode_to_vec(),
            Message::GetHeaders(p) | Message::GetBlockByIndex(p) => p.encode_to_vec(),
            Message::Headers(p) => p.encode_to_vec(),
            Message::GetBlocks(p) => p.encode_to_vec(),
            Message::Inv(p) | Message::GetData(p) | Message::NotFound(p) => p.encode_to_vec(),
            Message::Transaction(p) => p.encode_to_vec(),
            Message::Block(p) => p.encode_to_vec(),
            Message::Extensible(p) => p.encode_to_vec(),
            Message::Reject(p) => p.encode_to_vec(),
        }
    }

    fn decode_payload(command: MessageCommand, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match command {
            MessageCommand::Version => Message::Version(VersionPayload::decode(payload)?),
            MessageCommand::Verack => expect_empty(payload, Message::Verack)?,
            MessageCommand::GetAddr => expect_empty(payload, Message::GetAddr)?,
            MessageCommand::Addr => Message::Addr(AddrPayload::decode(payload)?),
            MessageCommand::Ping => Message::Ping(PingPayload::decode(payload)?),
            MessageCommand::Pong => Message::Pong(PingPayload::decode(payload)?),
            MessageCommand::GetHeaders => {
                Message::GetHeaders(GetBlockByIndexPayload::decode(payload)?)
            }
            MessageCommand::Headers => Message::Headers(HeadersPayload::decode(payload)?),
            MessageCommand::GetBlocks => Message::GetBlocks(GetBlocksPayload::decode(payload)?),
            MessageCommand::GetBlockByIndex => {
                Message::GetBlockByIndex(GetBlockByIndexPayload::decode(payload)?)
            }
            MessageCommand::Mempool => expect_empty(payload, Message::Mempool)?,
            MessageCommand::Inv => Message::Inv(InvPayload::decode(payload)?),
            MessageCommand::GetData => Message::GetData(InvPayload::decode(payload)?),
            MessageCommand::NotFound => Message::NotFound(InvPayload::decode(payload)?),
            MessageCommand::Transaction => Message::Transaction(Transaction::decode(payload)?),
            MessageCommand::Block => Message::Block(Block::decode(payload)?),
            MessageCommand::Extensible => Message::Extensible(ExtensiblePayload::decode(payload)?),
            MessageCommand::Reject => Message::Reject(RejectPayload::decode(payload)?),
        })
    }

    /// Serializes the full frame. `allow_compression` is cleared for peers
    /// advertising the `DisableCompression` capability.
    pub fn to_frame(&self, allow_compression: bool) -> Vec<u8> {
        let command = self.command();
        let raw = self.payload_bytes();

        let mut flags = FLAG_NONE;
        let mut payload = raw;
        if allow_compression && command.is_compressible() && payload.len() >= COMPRESSION_MIN_SIZE {
            let compressed = lz4_flex::compress_prepend_size(&payload);
            if compressed.len() + COMPRESSION_THRESHOLD < payload.len() {
                payload = compressed;
                flags = FLAG_COMPRESSED;
            }
        }

        let mut frame = Vec::with_capacity(2 + 5 + payload.len());
        frame.put_u8(flags);
        frame.put_u8(command as u8);
        write_var_bytes(&payload, &mut frame);
        frame
    }

    /// Decodes a message from an already-framed triple. The peer reader
    /// pulls the envelope off the socket itself so that a short read is
    /// distinguishable from a malformed payload.
    pub fn from_parts(
        flags: u8,
        command_byte: u8,
        payload: Vec<u8>,
    ) -> Result<Self, NetworkError> {
        let command = MessageCommand::from_byte(command_byte)?;
        let payload = if flags & FLAG_COMPRESSED != 0 {
            decompress(&payload)?
        } else {
            if flags != FLAG_NONE {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "message flags",
                    value: flags,
                }
                .into());
            }
            payload
        };
        Ok(Self::decode_payload(command, &payload)?)
    }

    /// Decodes one frame from the front of `buf`, returning the message and
    /// the consumed length.
    pub fn from_frame(buf: &[u8]) -> Result<(Self, usize), NetworkError> {
        let (flags, rest) = u8::decode_unfinished(buf)?;
        let (command_byte, rest) = u8::decode_unfinished(rest)?;
        let (payload, rest) = read_var_bytes(rest, PAYLOAD_MAX_SIZE).map_err(|error| match error {
            DecodeError::LengthCap { .. } => NetworkError::OversizeFrame {
                cap: PAYLOAD_MAX_SIZE,
            },
            other => NetworkError::Decode(other),
        })?;
        let consumed = buf.len() - rest.len();
        let message = Self::from_parts(flags, command_byte, payload)?;
        Ok((message, consumed))
    }
}

fn expect_empty(payload: &[u8], message: Message) -> Result<Message, DecodeError> {
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(DecodeError::TrailingBytes)
    }
}

fn decompress(payload: &[u8]) -> Result<Vec<u8>, NetworkError> {
    if payload.len() < 4 {
        return Err(NetworkError::Decompression);
    }
    let declared = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if declared > PAYLOAD_MAX_SIZE {
        return Err(NetworkError::OversizeFrame { cap: PAYLOAD_MAX_SIZE });
    }
    lz4_flex::decompress_size_prepended(payload).map_err(|_| NetworkError::Decompression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::InventoryType;
    use neorex_common::types::UInt256;

    fn round_trip(message: Message) -> Message {
        let frame = message.to_frame(true);
        let (decoded, consumed) = Message::from_frame(&frame).expect("decode");
        assert_eq!(consumed, frame.len());
        decoded
    }

    #[test]
    fn empty_payload_commands_round_trip() {
        for message in [Message::Verack, Message::GetAddr, Message::Mempool] {
            assert_eq!(round_trip(message.clone()), message);
        }
    }

    #[test]
    fn ping_round_trip() {
        let message = Message::Ping(PingPayload {
            last_block_index: 42,
            timestamp: 1_700_000,
            nonce: 0xdead,
        });
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn inv_round_trip() {
        let message = Message::Inv(InvPayload {
            inventory_type: InventoryType::Transaction,
            hashes: vec![UInt256::hash256_of(b"a"), UInt256::hash256_of(b"b")],
        });
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn small_payloads_stay_uncompressed() {
        let message = Message::Inv(InvPayload {
            inventory_type: InventoryType::Block,
            hashes: vec![UInt256::zero()],
        });
        let frame = message.to_frame(true);
        assert_eq!(frame[0], FLAG_NONE);
    }

    #[test]
    fn large_compressible_payloads_get_the_flag() {
        // A run-heavy extensible payload far above the 128-byte floor.
        let message = Message::Extensible(ExtensiblePayload {
            category: "dBFT".into(),
            valid_block_start: 0,
            valid_block_end: 100,
            sender: Default::default(),
            data: vec![0u8; 4_096],
            witness: Default::default(),
        });
        let frame = message.to_frame(true);
        assert_eq!(frame[0], FLAG_COMPRESSED);
        let (decoded, _) = Message::from_frame(&frame).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn compression_respects_peer_opt_out() {
        let message = Message::Extensible(ExtensiblePayload {
            category: "dBFT".into(),
            valid_block_start: 0,
            valid_block_end: 100,
            sender: Default::default(),
            data: vec![0u8; 4_096],
            witness: Default::default(),
        });
        let frame = message.to_frame(false);
        assert_eq!(frame[0], FLAG_NONE);
        assert!(Message::from_frame(&frame).is_ok());
    }

    #[test]
    fn incompressible_payloads_skip_the_saving_check() {
        // High-entropy data compresses poorly; the flag must stay clear
        // rather than ship a larger-than-raw payload.
        let data: Vec<u8> = (0..4_096u32)
            .flat_map(|i| neorex_crypto::sha256(&i.to_le_bytes()))
            .collect();
        let message = Message::Extensible(ExtensiblePayload {
            category: "dBFT".into(),
            valid_block_start: 0,
            valid_block_end: 1,
            sender: Default::default(),
            data,
            witness: Default::default(),
        });
        let frame = message.to_frame(true);
        assert_eq!(frame[0], FLAG_NONE);
    }

    #[test]
    fn unknown_command_rejected() {
        let frame = [FLAG_NONE, 0x7e, 0x00];
        assert!(Message::from_frame(&frame).is_err());
    }

    #[test]
    fn truncated_frame_rejected() {
        let message = Message::Ping(PingPayload {
            last_block_index: 1,
            timestamp: 2,
            nonce: 3,
        });
        let frame = message.to_frame(true);
        assert!(Message::from_frame(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn oversize_declared_decompression_rejected() {
        // Compressed flag with a forged huge uncompressed-size prefix.
        let mut payload = ((PAYLOAD_MAX_SIZE + 1) as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(&[0u8; 16]);
        let mut frame = vec![FLAG_COMPRESSED, MessageCommand::Block as u8];
        write_var_bytes(&payload, &mut frame);
        assert!(matches!(
            Message::from_frame(&frame),
            Err(NetworkError::OversizeFrame { .. })
        ));
    }
}

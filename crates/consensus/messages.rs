//! Consensus message set and its extensible-payload envelope.
//!
//! Wire layout inside `extensible.data`:
//! `block_index:u32 || validator_index:u8 || view_number:u8 || type:u8 || body`.
//! Authentication is the envelope witness: the sending validator's
//! single-sig witness over `network_magic || hash(payload)`.

use bytes::BufMut;
use neorex_blockchain::vm::signature_invocation;
use neorex_common::signing::signing_data;
use neorex_common::types::{single_sig_script, UInt160, UInt256, Witness};
use neorex_crypto::KeyPair;
use neorex_io::{
    decode::{decode_var_array, read_var_bytes},
    encode::write_var_bytes,
    DecodeError, NeoDecode, NeoEncode,
};
use neorex_p2p::payloads::ExtensiblePayload;

/// Category every consensus envelope travels under.
pub const CONSENSUS_CATEGORY: &str = "dBFT";

const TYPE_CHANGE_VIEW: u8 = 0x00;
const TYPE_PREPARE_REQUEST: u8 = 0x20;
const TYPE_PREPARE_RESPONSE: u8 = 0x21;
const TYPE_COMMIT: u8 = 0x30;
const TYPE_RECOVERY_REQUEST: u8 = 0x40;
const TYPE_RECOVERY_MESSAGE: u8 = 0x41;

/// Cap on transaction hashes in one proposal; mirrors the block policy cap.
const MAX_PROPOSAL_HASHES: usize = 0xffff;

/// Inner payloads bundled by a recovery message.
const MAX_RECOVERY_ITEMS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewChangeReason {
    Timeout = 0x00,
    ChangeAgreement = 0x01,
    TxNotFound = 0x02,
    TxRejectedByPolicy = 0x03,
    TxInvalid = 0x04,
    BlockRejectedByPolicy = 0x05,
}

impl ViewChangeReason {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0x00 => Self::Timeout,
            0x01 => Self::ChangeAgreement,
            0x02 => Self::TxNotFound,
            0x03 => Self::TxRejectedByPolicy,
            0x04 => Self::TxInvalid,
            0x05 => Self::BlockRejectedByPolicy,
            other => {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "view change reason",
                    value: other,
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessageBody {
    ChangeView {
        new_view: u8,
        timestamp: u64,
        reason: ViewChangeReason,
    },
    PrepareRequest {
        version: u32,
        prev_hash: UInt256,
        timestamp: u64,
        nonce: u64,
        tx_hashes: Vec<UInt256>,
    },
    PrepareResponse {
        /// Hash of the `PrepareRequest` envelope being answered.
        preparation_hash: UInt256,
    },
    Commit {
        /// Signature over the proposed block's signing data.
        signature: [u8; 64],
    },
    RecoveryRequest {
        timestamp: u64,
    },
    RecoveryMessage {
        /// Original signed envelopes, re-validated individually on apply.
        payloads: Vec<ExtensiblePayload>,
    },
}

impl ConsensusMessageBody {
    pub fn message_type(&self) -> u8 {
        match self {
            Self::ChangeView { .. } => TYPE_CHANGE_VIEW,
            Self::PrepareRequest { .. } => TYPE_PREPARE_REQUEST,
            Self::PrepareResponse { .. } => TYPE_PREPARE_RESPONSE,
            Self::Commit { .. } => TYPE_COMMIT,
            Self::RecoveryRequest { .. } => TYPE_RECOVERY_REQUEST,
            Self::RecoveryMessage { .. } => TYPE_RECOVERY_MESSAGE,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ChangeView { .. } => "ChangeView",
            Self::PrepareRequest { .. } => "PrepareRequest",
            Self::PrepareResponse { .. } => "PrepareResponse",
            Self::Commit { .. } => "Commit",
            Self::RecoveryRequest { .. } => "RecoveryRequest",
            Self::RecoveryMessage { .. } => "RecoveryMessage",
        }
    }
}

/// A consensus message as carried in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub block_index: u32,
    pub validator_index: u8,
    pub view_number: u8,
    pub body: ConsensusMessageBody,
}

impl NeoEncode for ConsensusMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.block_index.encode(buf);
        buf.put_u8(self.validator_index);
        buf.put_u8(self.view_number);
        buf.put_u8(self.body.message_type());
        match &self.body {
            ConsensusMessageBody::ChangeView {
                new_view,
                timestamp,
                reason,
            } => {
                buf.put_u8(*new_view);
                timestamp.encode(buf);
                buf.put_u8(*reason as u8);
            }
            ConsensusMessageBody::PrepareRequest {
                version,
                prev_hash,
                timestamp,
                nonce,
                tx_hashes,
            } => {
                version.encode(buf);
                prev_hash.encode(buf);
                timestamp.encode(buf);
                nonce.encode(buf);
                tx_hashes.encode(buf);
            }
            ConsensusMessageBody::PrepareResponse { preparation_hash } => {
                preparation_hash.encode(buf);
            }
            ConsensusMessageBody::Commit { signature } => {
                signature.encode(buf);
            }
            ConsensusMessageBody::RecoveryRequest { timestamp } => {
                timestamp.encode(buf);
            }
            ConsensusMessageBody::RecoveryMessage { payloads } => {
                neorex_io::encode::write_var_int(payloads.len() as u64, buf);
                for payload in payloads {
                    write_var_bytes(&payload.encode_to_vec(), buf);
                }
            }
        }
    }
}

impl NeoDecode for ConsensusMessage {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (block_index, rest) = u32::decode_unfinished(buf)?;
        let (validator_index, rest) = u8::decode_unfinished(rest)?;
        let (view_number, rest) = u8::decode_unfinished(rest)?;
        let (message_type, rest) = u8::decode_unfinished(rest)?;
        let (body, rest) = match message_type {
            TYPE_CHANGE_VIEW => {
                let (new_view, rest) = u8::decode_unfinished(rest)?;
                let (timestamp, rest) = u64::decode_unfinished(rest)?;
                let (reason_byte, rest) = u8::decode_unfinished(rest)?;
                (
                    ConsensusMessageBody::ChangeView {
                        new_view,
                        timestamp,
                        reason: ViewChangeReason::from_byte(reason_byte)?,
                    },
                    rest,
                )
            }
            TYPE_PREPARE_REQUEST => {
                let (version, rest) = u32::decode_unfinished(rest)?;
                let (prev_hash, rest) = UInt256::decode_unfinished(rest)?;
                let (timestamp, rest) = u64::decode_unfinished(rest)?;
                let (nonce, rest) = u64::decode_unfinished(rest)?;
                let (tx_hashes, rest) = decode_var_array(rest, MAX_PROPOSAL_HASHES)?;
                (
                    ConsensusMessageBody::PrepareRequest {
                        version,
                        prev_hash,
                        timestamp,
                        nonce,
                        tx_hashes,
                    },
                    rest,
                )
            }
            TYPE_PREPARE_RESPONSE => {
                let (preparation_hash, rest) = UInt256::decode_unfinished(rest)?;
                (
                    ConsensusMessageBody::PrepareResponse { preparation_hash },
                    rest,
                )
            }
            TYPE_COMMIT => {
                let (signature, rest) = <[u8; 64]>::decode_unfinished(rest)?;
                (ConsensusMessageBody::Commit { signature }, rest)
            }
            TYPE_RECOVERY_REQUEST => {
                let (timestamp, rest) = u64::decode_unfinished(rest)?;
                (ConsensusMessageBody::RecoveryRequest { timestamp }, rest)
            }
            TYPE_RECOVERY_MESSAGE => {
                let (count, mut rest) = neorex_io::decode::read_var_int(rest)?;
                if count > MAX_RECOVERY_ITEMS as u64 {
                    return Err(DecodeError::LengthCap {
                        declared: count,
                        cap: MAX_RECOVERY_ITEMS,
                    });
                }
                let mut payloads = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (bytes, r) = read_var_bytes(rest, 0x0100_0000)?;
                    payloads.push(ExtensiblePayload::decode(&bytes)?);
                    rest = r;
                }
                (ConsensusMessageBody::RecoveryMessage { payloads }, rest)
            }
            other => {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "consensus message type",
                    value: other,
                })
            }
        };
        Ok((
            Self {
                block_index,
                validator_index,
                view_number,
                body,
            },
            rest,
        ))
    }
}

impl ConsensusMessage {
    /// Wraps the message into a signed extensible envelope. The validity
    /// window spans exactly the height being decided.
    pub fn into_envelope(self, network_magic: u32, keypair: &KeyPair) -> ExtensiblePayload {
        let verification = single_sig_script(&keypair.public_key());
        let sender = UInt160::hash160_of(&verification);
        let mut payload = ExtensiblePayload {
            category: CONSENSUS_CATEGORY.into(),
            valid_block_start: self.block_index.saturating_sub(1),
            valid_block_end: self.block_index.saturating_add(1),
            sender,
            data: self.encode_to_vec(),
            witness: Witness::default(),
        };
        let signature = keypair.sign(&signing_data(network_magic, &payload.hash()));
        payload.witness = Witness::new(signature_invocation(&[signature]), verification);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(body: ConsensusMessageBody) {
        let message = ConsensusMessage {
            block_index: 7,
            validator_index: 2,
            view_number: 1,
            body,
        };
        let encoded = message.encode_to_vec();
        assert_eq!(ConsensusMessage::decode(&encoded).expect("decode"), message);
    }

    #[test]
    fn all_bodies_round_trip() {
        round_trip(ConsensusMessageBody::ChangeView {
            new_view: 2,
            timestamp: 999,
            reason: ViewChangeReason::Timeout,
        });
        round_trip(ConsensusMessageBody::PrepareRequest {
            version: 0,
            prev_hash: UInt256::hash256_of(b"prev"),
            timestamp: 1_000,
            nonce: 5,
            tx_hashes: vec![UInt256::hash256_of(b"tx")],
        });
        round_trip(ConsensusMessageBody::PrepareResponse {
            preparation_hash: UInt256::hash256_of(b"req"),
        });
        round_trip(ConsensusMessageBody::Commit {
            signature: [7u8; 64],
        });
        round_trip(ConsensusMessageBody::RecoveryRequest { timestamp: 3 });
    }

    #[test]
    fn recovery_message_round_trips_nested_envelopes() {
        let keypair = KeyPair::generate();
        let inner = ConsensusMessage {
            block_index: 7,
            validator_index: 0,
            view_number: 0,
            body: ConsensusMessageBody::RecoveryRequest { timestamp: 1 },
        }
        .into_envelope(42, &keypair);

        round_trip(ConsensusMessageBody::RecoveryMessage {
            payloads: vec![inner],
        });
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = 7u32.encode_to_vec();
        buf.extend_from_slice(&[0, 0, 0x7a]);
        assert!(ConsensusMessage::decode(&buf).is_err());
    }

    #[test]
    fn envelope_is_signed_by_sender() {
        let keypair = KeyPair::generate();
        let magic = 42;
        let envelope = ConsensusMessage {
            block_index: 10,
            validator_index: 0,
            view_number: 0,
            body: ConsensusMessageBody::RecoveryRequest { timestamp: 1 },
        }
        .into_envelope(magic, &keypair);

        assert_eq!(
            envelope.witness.script_hash(),
            Some(envelope.sender),
            "witness must bind to the sender account"
        );
        assert!(envelope.is_valid_at(9));
        assert!(envelope.is_valid_at(10));
        assert!(!envelope.is_valid_at(11));
    }
}

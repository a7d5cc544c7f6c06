use neorex_blockchain::error::ChainError;
use neorex_io::DecodeError;
use neorex_storage::error::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer advertised wrong network magic {got:#x}, expected {expected:#x}")]
    MagicMismatch { expected: u32, got: u32 },
    #[error("handshake violation: {0}")]
    Handshake(String),
    #[error("frame exceeds {cap} bytes")]
    OversizeFrame { cap: usize },
    #[error("payload failed to decompress")]
    Decompression,
    #[error("peer send queue overflowed")]
    SendQueueFull,
    #[error("peer misbehaviour threshold reached")]
    Misbehaviour,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("read or write deadline expired")]
    Timeout,
    #[error("self-connection detected")]
    SelfConnection,
}

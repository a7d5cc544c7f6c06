use neorex_common::types::UInt256;
use neorex_io::DecodeError;
use neorex_storage::error::StoreError;

pub use neorex_common::{InvalidBlockError, InvalidTransactionError};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] InvalidBlockError),
    #[error("parent block not found")]
    ParentNotFound,
    #[error("block {0} already persisted")]
    AlreadyPersisted(UInt256),
    #[error("header chain too far ahead of block chain")]
    HeaderWindowExceeded,
    #[error("DB error: {0}")]
    StoreError(#[from] StoreError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Invariant violations after local assembly, store commit failures:
    /// the node must stop rather than propagate corruption.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ChainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Fatal(_))
    }
}

/// Why the mempool turned a transaction away. Surfaced synchronously to the
/// submitter.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum MempoolError {
    #[error("invalid transaction: {0}")]
    Invalid(#[from] InvalidTransactionError),
    #[error("fee per byte below policy minimum")]
    InsufficientFee,
    #[error("conflicts with pooled or chained state")]
    Conflict,
    #[error("pool is full and the transaction does not outbid the floor")]
    PoolFull,
}

use thiserror::Error;

use crate::types::UInt256;

/// Reasons a block fails verification. Any of these aborts ingest with no
/// partial state written.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum InvalidBlockError {
    #[error("block size {size} exceeds cap {cap}")]
    OversizeBlock { size: usize, cap: usize },
    #[error("block index {got} does not extend chain height (expected {expected})")]
    NonSequentialIndex { expected: u32, got: u32 },
    #[error("prev_hash does not match the chain tip")]
    PrevHashMismatch,
    #[error("timestamp {got} is not after parent timestamp {parent}")]
    TimestampNotMonotonic { parent: u64, got: u64 },
    #[error("timestamp {got} is too far ahead of local clock {local}")]
    TimestampTooFarAhead { local: u64, got: u64 },
    #[error("primary index {index} out of range for {validators} validators")]
    PrimaryIndexOutOfRange { index: u8, validators: usize },
    #[error("block witness does not satisfy prev.next_consensus")]
    InvalidBlockWitness,
    #[error("merkle root does not match transaction hashes")]
    MerkleRootMismatch,
    #[error("duplicate transaction {0} in block")]
    DuplicateTransaction(UInt256),
    #[error("aggregate system fee {total} exceeds block cap {cap}")]
    SystemFeeExceeded { total: i64, cap: i64 },
    #[error("transactions {0} and {1} conflict within the block")]
    ConflictingTransactions(UInt256, UInt256),
    #[error("transaction {0} failed verification: {1}")]
    InvalidTransaction(UInt256, InvalidTransactionError),
}

/// Reasons a transaction fails verification, shared by mempool admission
/// and block verification.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum InvalidTransactionError {
    #[error("transaction size {size} exceeds cap {cap}")]
    Oversize { size: usize, cap: usize },
    #[error("expired at block {valid_until}, current height {height}")]
    Expired { valid_until: u32, height: u32 },
    #[error("valid_until_block {valid_until} exceeds height {height} plus max increment")]
    TooFarInFuture { valid_until: u32, height: u32 },
    #[error("not valid before block {not_before}, current height {height}")]
    NotYetValid { not_before: u32, height: u32 },
    #[error("witness {index} does not authorize signer")]
    InvalidWitness { index: usize },
    #[error("network fee below policy minimum")]
    InsufficientNetworkFee,
    #[error("sender account is blocked by policy")]
    SenderBlocked,
    #[error("sender balance cannot cover fees")]
    InsufficientFunds,
    #[error("system fee exceeds per-transaction cap")]
    SystemFeeTooLarge,
    #[error("script execution rejected the transaction")]
    ScriptRejected,
}

use neorex_blockchain::error::ChainError;
use neorex_io::DecodeError;
use neorex_storage::error::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("message for height {got}, context at {expected}")]
    WrongHeight { expected: u32, got: u32 },
    #[error("validator index {0} out of range")]
    InvalidValidatorIndex(u8),
    #[error("envelope sender does not match validator {0}")]
    SenderMismatch(u8),
    #[error("envelope witness verification failed")]
    InvalidEnvelopeSignature,
    #[error("prepare request from non-primary validator {0}")]
    NotFromPrimary(u8),
    #[error("commit signature invalid for validator {0}")]
    InvalidCommitSignature(u8),
    #[error("refusing to sign conflicting commit at the same height and view")]
    ConflictingCommit,
    #[error("node is not a validator in the current committee")]
    WatchOnly,
    #[error("no prepare request accepted for this view")]
    MissingProposal,
    #[error("commit quorum incomplete")]
    IncompleteQuorum,
    #[error("proposal transaction {0} not yet known")]
    MissingTransaction(neorex_common::types::UInt256),
}

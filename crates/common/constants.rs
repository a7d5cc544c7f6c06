/// Hard cap on a serialized transaction, pre-policy.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;

/// Maximum signers (and therefore witnesses) per transaction.
pub const MAX_TRANSACTION_SIGNERS: usize = 16;

/// Maximum attributes per transaction.
pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;

/// Maximum entries in a signer's allowed-contracts / allowed-groups lists
/// and in a compound witness-rule condition.
pub const MAX_SUBITEMS: usize = 16;

/// Maximum nesting depth of a witness-rule condition tree.
pub const MAX_CONDITION_NESTING: usize = 2;

/// Script byte caps for witnesses.
pub const MAX_INVOCATION_SCRIPT: usize = 1024;
pub const MAX_VERIFICATION_SCRIPT: usize = 1024;

/// Cap on an oracle response body.
pub const MAX_ORACLE_RESULT: usize = 0xffff;

/// GAS indivisible units per whole token.
pub const GAS_FACTOR: i64 = 100_000_000;

/// System fee charged per transaction byte of network fee accounting.
pub const FEE_PER_BYTE_DEFAULT: i64 = 1_000;

mod attributes;
mod block;
mod hashes;
mod signer;
mod transaction;
mod validator;
mod witness;

pub mod genesis;

pub use attributes::{OracleResponseCode, TransactionAttribute};
pub use block::{Block, Header};
pub use hashes::{UInt160, UInt256};
pub use signer::{Signer, WitnessCondition, WitnessRule, WitnessRuleAction, WitnessScopes};
pub use transaction::Transaction;
pub use validator::{
    multi_sig_script, next_consensus_address, parse_verification_script, single_sig_script,
    ValidatorSet, VerificationContract,
};
pub use witness::Witness;

pub mod config;
pub mod constants;
pub mod errors;
pub mod signing;
pub mod types;

pub use config::{Hardfork, ProtocolConfig};
pub use errors::{InvalidBlockError, InvalidTransactionError};
pub use types::{
    Block, Header, Signer, Transaction, TransactionAttribute, UInt160, UInt256, ValidatorSet,
    Witness, WitnessScopes,
};

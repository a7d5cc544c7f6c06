pub mod context;
pub mod error;
pub mod messages;
pub mod recovery;
pub mod service;

pub use context::{ConsensusContext, Phase};
pub use error::ConsensusError;
pub use messages::{ConsensusMessage, ConsensusMessageBody, ViewChangeReason};
pub use service::{ConsensusNetwork, DbftService};

pub mod error;
pub mod message;
pub mod network;
pub mod payloads;
pub mod peer;
pub mod peer_scoring;
pub mod sync;

pub use error::NetworkError;
pub use message::{Message, MessageCommand};
pub use network::{LocalNode, NetworkConfig};

mod addr;
mod extensible;
mod headers;
mod inventory;
mod ping;
mod reject;
mod version;

pub use addr::{AddrPayload, NetworkAddress};
pub use extensible::ExtensiblePayload;
pub use headers::{GetBlockByIndexPayload, GetBlocksPayload, HeadersPayload};
pub use inventory::{InvPayload, InventoryType};
pub use ping::PingPayload;
pub use reject::RejectPayload;
pub use version::{NodeCapability, VersionPayload};

mod engine;
mod in_memory;
mod snapshot;

pub mod error;
pub mod keys;
pub mod store;

pub use engine::{EngineType, ReadView, StoreEngine, WriteBatch};
pub use snapshot::{Snapshot, SnapshotOverlay, StorageRw};
pub use store::Store;

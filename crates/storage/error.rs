use neorex_io::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("missing chain tip: store has no persisted blocks")]
    MissingTip,
    #[error("engine does not support atomic commit")]
    NonAtomicEngine,
    #[error("{0}")]
    Custom(String),
}

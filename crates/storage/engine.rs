use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;

/// Which key-value engine backs the store.
///
/// The on-disk engines are external collaborators behind this same trait;
/// the in-memory engine is the reference implementation and the test
/// vehicle. An engine that cannot commit a batch atomically must refuse to
/// open rather than risk partial block application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineType {
    #[default]
    InMemory,
}

/// A point-in-time read view. Isolated from commits that happen after it
/// was taken.
pub trait ReadView: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Entries whose key starts with `prefix`, in lexicographic key order.
    fn seek_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError>;
}

/// The engine contract: reads, prefix seeks, snapshots, and atomic batch
/// commits. A single writer (the blockchain executor) owns all commits.
pub trait StoreEngine: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn seek_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError>;

    /// Takes an isolated read view of the current committed state.
    fn snapshot(&self) -> Result<Arc<dyn ReadView>, StoreError>;

    /// Applies the whole batch or none of it.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// An ordered set of puts and deletes applied atomically. Later writes to
/// the same key win.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.entries.insert(key, None);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, Option<&Vec<u8>>)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    pub fn into_entries(self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        self.entries
    }

    /// Folds `other` over `self`; `other`'s writes win on key collisions.
    pub fn merge(&mut self, other: WriteBatch) {
        self.entries.extend(other.entries);
    }
}

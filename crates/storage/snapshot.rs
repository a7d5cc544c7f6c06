use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::{ReadView, WriteBatch};
use crate::error::StoreError;

/// Uniform read/write surface shared by [`Snapshot`] and its per-transaction
/// [`SnapshotOverlay`], so storage-touching code runs identically inside and
/// outside transaction isolation.
pub trait StorageRw {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
}

/// A writable view over a point-in-time base: reads see the pending writes
/// first (read-your-writes), the base second. Converting into a
/// [`WriteBatch`] hands everything to the engine for one atomic commit.
///
/// The executor runs a whole block against one snapshot; nothing is visible
/// to other readers until the commit lands.
pub struct Snapshot {
    base: Arc<dyn ReadView>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Snapshot {
    pub fn new(base: Arc<dyn ReadView>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.base.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Merged prefix scan: pending writes shadow the base, pending deletes
    /// hide it, order stays lexicographic.
    pub fn seek_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .seek_prefix(prefix)?
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        for (key, value) in &self.writes {
            if !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Number of pending writes (puts and deletes).
    pub fn pending_len(&self) -> usize {
        self.writes.len()
    }

    /// Drops writes whose key starts with `prefix`. Used to revert a single
    /// transaction's storage changes when its script faults.
    pub fn discard_prefix(&mut self, prefix: &[u8]) {
        self.writes.retain(|key, _| !key.starts_with(prefix));
    }

    /// Takes the pending writes, leaving the snapshot empty.
    pub fn take_batch(&mut self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in std::mem::take(&mut self.writes) {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }

    /// Clones the pending writes into a batch without consuming them.
    pub fn to_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in &self.writes {
            match value {
                Some(value) => batch.put(key.clone(), value.clone()),
                None => batch.delete(key.clone()),
            }
        }
        batch
    }

    /// Forks a child view sharing this snapshot's current state as its base.
    /// The child's writes stay local until folded back with
    /// [`Snapshot::apply`]. This is the per-transaction isolation layer.
    pub fn fork(&self) -> SnapshotOverlay<'_> {
        SnapshotOverlay {
            parent: self,
            writes: BTreeMap::new(),
        }
    }

    /// Folds a child overlay's writes into this snapshot.
    pub fn apply(&mut self, overlay_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>) {
        self.writes.extend(overlay_writes);
    }
}

/// Per-transaction overlay over a [`Snapshot`]. Discarded on fault, folded
/// into the parent on success.
pub struct SnapshotOverlay<'a> {
    parent: &'a Snapshot,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl SnapshotOverlay<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.parent.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    pub fn into_writes(self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        self.writes
    }
}

impl StorageRw for Snapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Snapshot::get(self, key)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        Snapshot::put(self, key, value)
    }

    fn delete(&mut self, key: Vec<u8>) {
        Snapshot::delete(self, key)
    }
}

impl StorageRw for SnapshotOverlay<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        SnapshotOverlay::get(self, key)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        SnapshotOverlay::put(self, key, value)
    }

    fn delete(&mut self, key: Vec<u8>) {
        SnapshotOverlay::delete(self, key)
    }
}

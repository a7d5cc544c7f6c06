use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::engine::{ReadView, StoreEngine, WriteBatch};
use crate::error::StoreError;

type KvMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Reference engine: a copy-on-write ordered map.
///
/// Commits build a fresh map and swap the `Arc`, so snapshots taken before
/// a commit keep reading the old version without holding any lock. Cloning
/// the map per commit is O(n) and perfectly fine for the workloads this
/// engine exists for (tests, private nets, tooling).
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    current: RwLock<Arc<KvMap>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self) -> Result<Arc<KvMap>, StoreError> {
        Ok(self
            .current
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone())
    }
}

struct InMemoryView {
    map: Arc<KvMap>,
}

impl ReadView for InMemoryView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(key).cloned())
    }

    fn seek_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError> {
        Ok(Box::new(collect_prefix(&self.map, prefix).into_iter()))
    }
}

fn collect_prefix(map: &KvMap, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl StoreEngine for InMemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn seek_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError> {
        Ok(Box::new(collect_prefix(&*self.load()?, prefix).into_iter()))
    }

    fn snapshot(&self) -> Result<Arc<dyn ReadView>, StoreError> {
        Ok(Arc::new(InMemoryView { map: self.load()? }))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.current.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut next = (**guard).clone();
        for (key, value) in batch.into_entries() {
            match value {
                Some(value) => {
                    next.insert(key, value);
                }
                None => {
                    next.remove(&key);
                }
            }
        }
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_read() {
        let engine = InMemoryEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        engine.commit(batch).expect("commit");

        assert_eq!(engine.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"missing").expect("get"), None);
    }

    #[test]
    fn delete_removes_key() {
        let engine = InMemoryEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        engine.commit(batch).expect("commit");

        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec());
        engine.commit(batch).expect("commit");
        assert_eq!(engine.get(b"a").expect("get"), None);
    }

    #[test]
    fn snapshot_is_isolated_from_later_commits() {
        let engine = InMemoryEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(b"key".to_vec(), b"old".to_vec());
        engine.commit(batch).expect("commit");

        let snapshot = engine.snapshot().expect("snapshot");

        let mut batch = WriteBatch::new();
        batch.put(b"key".to_vec(), b"new".to_vec());
        engine.commit(batch).expect("commit");

        assert_eq!(snapshot.get(b"key").expect("get"), Some(b"old".to_vec()));
        assert_eq!(engine.get(b"key").expect("get"), Some(b"new".to_vec()));
    }

    #[test]
    fn seek_prefix_is_ordered_and_bounded() {
        let engine = InMemoryEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(vec![1, 3], b"c".to_vec());
        batch.put(vec![1, 1], b"a".to_vec());
        batch.put(vec![1, 2], b"b".to_vec());
        batch.put(vec![2, 1], b"other".to_vec());
        engine.commit(batch).expect("commit");

        let entries: Vec<_> = engine.seek_prefix(&[1]).expect("seek").collect();
        assert_eq!(
            entries,
            vec![
                (vec![1, 1], b"a".to_vec()),
                (vec![1, 2], b"b".to_vec()),
                (vec![1, 3], b"c".to_vec()),
            ]
        );
    }

    #[test]
    fn batch_last_write_wins() {
        let engine = InMemoryEngine::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"first".to_vec());
        batch.put(b"k".to_vec(), b"second".to_vec());
        engine.commit(batch).expect("commit");
        assert_eq!(engine.get(b"k").expect("get"), Some(b"second".to_vec()));
    }
}

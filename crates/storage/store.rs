use std::sync::Arc;

use neorex_common::types::{Block, Header, Transaction, UInt160, UInt256};
use neorex_io::{NeoDecode, NeoEncode};
use tracing::debug;

use crate::engine::{EngineType, ReadView, StoreEngine, WriteBatch};
use crate::error::StoreError;
use crate::in_memory::InMemoryEngine;
use crate::keys;
use crate::snapshot::Snapshot;

/// Typed facade over the key-value engine.
///
/// Reads decode the ledger records; writes are staged into a [`Snapshot`]
/// by the executor and land in one atomic commit per block. `Store` is
/// cheap to clone and shared across the node.
#[derive(Debug, Clone)]
pub struct Store {
    engine: Arc<dyn StoreEngine>,
}

impl Store {
    pub fn new(engine_type: EngineType) -> Result<Self, StoreError> {
        let engine: Arc<dyn StoreEngine> = match engine_type {
            EngineType::InMemory => Arc::new(InMemoryEngine::new()),
        };
        debug!(?engine_type, "opened store");
        Ok(Self { engine })
    }

    /// Point-in-time read view of committed state.
    pub fn read_view(&self) -> Result<Arc<dyn ReadView>, StoreError> {
        self.engine.snapshot()
    }

    /// Writable snapshot over the current committed state.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot::new(self.engine.snapshot()?))
    }

    /// Atomic batch commit; the executor is the only caller.
    pub fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.engine.commit(batch)
    }

    // ---- ledger reads -----------------------------------------------------

    pub fn height(&self) -> Result<Option<u32>, StoreError> {
        Ok(self.current_block_pointer()?.map(|(_, index)| index))
    }

    pub fn current_hash(&self) -> Result<Option<UInt256>, StoreError> {
        Ok(self.current_block_pointer()?.map(|(hash, _)| hash))
    }

    pub fn header_height(&self) -> Result<Option<u32>, StoreError> {
        match self.engine.get(&keys::current_header())? {
            Some(bytes) => Ok(Some(decode_pointer(&bytes)?.1)),
            None => Ok(None),
        }
    }

    pub fn current_header_hash(&self) -> Result<Option<UInt256>, StoreError> {
        match self.engine.get(&keys::current_header())? {
            Some(bytes) => Ok(Some(decode_pointer(&bytes)?.0)),
            None => Ok(None),
        }
    }

    pub fn get_block(&self, hash: &UInt256) -> Result<Option<Block>, StoreError> {
        match self.engine.get(&keys::block(hash))? {
            Some(bytes) => Ok(Some(Block::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_hash(&self, index: u32) -> Result<Option<UInt256>, StoreError> {
        match self.engine.get(&keys::block_hash_by_index(index))? {
            Some(bytes) => Ok(Some(UInt256::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_index(&self, index: u32) -> Result<Option<Block>, StoreError> {
        match self.get_block_hash(index)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, hash: &UInt256) -> Result<bool, StoreError> {
        Ok(self.engine.get(&keys::block(hash))?.is_some())
    }

    pub fn get_header(&self, hash: &UInt256) -> Result<Option<Header>, StoreError> {
        match self.engine.get(&keys::header(hash))? {
            Some(bytes) => Ok(Some(Header::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_header_hash(&self, index: u32) -> Result<Option<UInt256>, StoreError> {
        match self.engine.get(&keys::header_hash_by_index(index))? {
            Some(bytes) => Ok(Some(UInt256::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_header_by_index(&self, index: u32) -> Result<Option<Header>, StoreError> {
        match self.get_header_hash(index)? {
            Some(hash) => self.get_header(&hash),
            None => Ok(None),
        }
    }

    /// The block a transaction landed in plus the transaction itself.
    pub fn get_transaction(
        &self,
        hash: &UInt256,
    ) -> Result<Option<(u32, Transaction)>, StoreError> {
        match self.engine.get(&keys::transaction(hash))? {
            Some(bytes) => {
                let (index, rest) = u32::decode_unfinished(&bytes)?;
                let tx = Transaction::decode(rest)?;
                Ok(Some((index, tx)))
            }
            None => Ok(None),
        }
    }

    pub fn contains_transaction(&self, hash: &UInt256) -> Result<bool, StoreError> {
        Ok(self.engine.get(&keys::transaction(hash))?.is_some())
    }

    /// Committed contract storage read; execution-time reads go through the
    /// snapshot instead.
    pub fn get_storage_item(
        &self,
        contract_id: i32,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.engine.get(&keys::storage_item(contract_id, key))
    }

    pub fn get_consensus_state(&self, account: &UInt160) -> Result<Option<Vec<u8>>, StoreError> {
        self.engine.get(&keys::consensus_state(account))
    }

    /// Persisted before a validator broadcasts a commit, outside the block
    /// batch: losing a block commit is recoverable, double-signing is not.
    pub fn put_consensus_state(
        &self,
        account: &UInt160,
        state: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(keys::consensus_state(account), state);
        self.engine.commit(batch)
    }

    // ---- ledger writes (staged) -------------------------------------------

    /// Stages the ledger records for a block into `snapshot`: body, hash
    /// index, header records, transactions, and both chain pointers. The
    /// caller commits the snapshot's batch.
    pub fn stage_block(&self, snapshot: &mut Snapshot, block: &Block) {
        let hash = block.hash();
        snapshot.put(keys::block(&hash), block.encode_to_vec());
        snapshot.put(keys::block_hash_by_index(block.index()), hash.encode_to_vec());
        self.stage_header_records(snapshot, &block.header);
        for tx in &block.transactions {
            let mut value = block.index().encode_to_vec();
            tx.encode(&mut value);
            snapshot.put(keys::transaction(&tx.hash()), value);
        }
        snapshot.put(keys::current_block(), encode_pointer(hash, block.index()));
        // The body never trails the header chain.
        snapshot.put(keys::current_header(), encode_pointer(hash, block.index()));
    }

    /// Stages a header accepted ahead of its body.
    pub fn stage_header(&self, snapshot: &mut Snapshot, header: &Header) {
        self.stage_header_records(snapshot, header);
        snapshot.put(keys::current_header(), encode_pointer(header.hash(), header.index));
    }

    fn stage_header_records(&self, snapshot: &mut Snapshot, header: &Header) {
        let hash = header.hash();
        snapshot.put(keys::header(&hash), header.encode_to_vec());
        snapshot.put(keys::header_hash_by_index(header.index), hash.encode_to_vec());
    }

    fn current_block_pointer(&self) -> Result<Option<(UInt256, u32)>, StoreError> {
        match self.engine.get(&keys::current_block())? {
            Some(bytes) => Ok(Some(decode_pointer(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn encode_pointer(hash: UInt256, index: u32) -> Vec<u8> {
    let mut out = hash.encode_to_vec();
    index.encode(&mut out);
    out
}

fn decode_pointer(bytes: &[u8]) -> Result<(UInt256, u32), StoreError> {
    let (hash, rest) = UInt256::decode_unfinished(bytes)?;
    let index = u32::decode(rest)?;
    Ok((hash, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_common::config::ProtocolConfig;
    use neorex_common::types::genesis::genesis_block;

    fn store() -> Store {
        Store::new(EngineType::InMemory).expect("open")
    }

    fn persist(store: &Store, block: &Block) {
        let mut snapshot = store.snapshot().expect("snapshot");
        store.stage_block(&mut snapshot, block);
        store.commit(snapshot.take_batch()).expect("commit");
    }

    #[test]
    fn empty_store_has_no_tip() {
        let store = store();
        assert_eq!(store.height().expect("height"), None);
        assert_eq!(store.current_hash().expect("hash"), None);
    }

    #[test]
    fn block_round_trip_through_ledger_records() {
        let store = store();
        let block = genesis_block(&ProtocolConfig::default());
        persist(&store, &block);

        assert_eq!(store.height().expect("height"), Some(0));
        assert_eq!(store.current_hash().expect("hash"), Some(block.hash()));
        assert_eq!(
            store.get_block(&block.hash()).expect("get"),
            Some(block.clone())
        );
        assert_eq!(
            store.get_block_by_index(0).expect("get"),
            Some(block.clone())
        );
        assert_eq!(
            store.get_header(&block.hash()).expect("get"),
            Some(block.header.clone())
        );
        assert_eq!(store.header_height().expect("height"), Some(0));
    }

    #[test]
    fn header_only_staging_advances_header_pointer_not_height() {
        let store = store();
        let genesis = genesis_block(&ProtocolConfig::default());
        persist(&store, &genesis);

        let mut header = genesis.header.clone();
        header.index = 1;
        header.prev_hash = genesis.hash();
        header.timestamp += 15_000;

        let mut snapshot = store.snapshot().expect("snapshot");
        store.stage_header(&mut snapshot, &header);
        store.commit(snapshot.take_batch()).expect("commit");

        assert_eq!(store.height().expect("height"), Some(0));
        assert_eq!(store.header_height().expect("height"), Some(1));
        assert_eq!(
            store.get_header_by_index(1).expect("get"),
            Some(header)
        );
    }

    #[test]
    fn consensus_state_round_trip() {
        let store = store();
        let account = UInt160::from_bytes([9; 20]);
        assert_eq!(store.get_consensus_state(&account).expect("get"), None);
        store
            .put_consensus_state(&account, vec![1, 2, 3])
            .expect("put");
        assert_eq!(
            store.get_consensus_state(&account).expect("get"),
            Some(vec![1, 2, 3])
        );
    }
}

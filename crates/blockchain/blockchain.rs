pub mod constants;
pub mod error;
pub mod events;
pub mod mempool;
pub mod native;
pub mod payload;
#[cfg(test)]
mod smoke_test;
pub mod vm;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use neorex_common::config::ProtocolConfig;
use neorex_common::types::genesis::genesis_block;
use neorex_common::types::{
    single_sig_script, Block, Header, Transaction, UInt160, UInt256,
};
use neorex_storage::{Snapshot, Store};

use crate::constants::{MAX_HEADER_AHEAD, ORPHAN_CACHE_CAPACITY, REVERIFY_BATCH};
use crate::error::{ChainError, InvalidBlockError, InvalidTransactionError, MempoolError};
use crate::events::{EventBus, NodeEvent};
use crate::mempool::{Mempool, PoolVerifier};
use crate::native::{gas_token, policy, NativeRegistry, PersistCtx, PersistingBlock};
use crate::vm::{ExecutionResult, ScriptExecutor, StandardRuntime, TxContext};

/// How a block reached the executor. Locally assembled blocks already
/// carry a quorum the consensus engine counted, so their witness is
/// trusted; everything else is re-verified in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
    Consensus,
    Network,
}

/// Per-transaction execution record, for observers and tracing.
#[derive(Debug, Clone)]
pub struct ApplicationLog {
    pub tx_hash: UInt256,
    pub result: ExecutionResult,
}

#[derive(Debug, Default)]
struct OrphanCache {
    by_prev: HashMap<UInt256, Block>,
    order: VecDeque<UInt256>,
}

impl OrphanCache {
    fn insert(&mut self, block: Block) {
        let prev = block.prev_hash();
        if self.by_prev.contains_key(&prev) {
            return;
        }
        while self.by_prev.len() >= ORPHAN_CACHE_CAPACITY {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.by_prev.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(prev);
        self.by_prev.insert(prev, block);
    }

    fn take_child_of(&mut self, parent_hash: &UInt256) -> Option<Block> {
        let block = self.by_prev.remove(parent_hash)?;
        self.order.retain(|hash| hash != parent_hash);
        Some(block)
    }
}

/// The blockchain executor: verifies blocks, runs their transactions
/// against a snapshot, and commits atomically. Sole writer of the store.
pub struct Blockchain {
    config: Arc<ProtocolConfig>,
    store: Store,
    mempool: Arc<Mempool>,
    natives: Arc<NativeRegistry>,
    runtime: Arc<dyn ScriptExecutor>,
    events: EventBus,
    orphans: Mutex<OrphanCache>,
    /// Serializes block application; readers never take it.
    persist_lock: Mutex<()>,
}

impl Blockchain {
    /// Opens the chain over `store`, bootstrapping genesis on first run.
    pub fn new(config: Arc<ProtocolConfig>, store: Store, events: EventBus) -> Result<Self, ChainError> {
        let natives = Arc::new(NativeRegistry::new(config.clone()));
        let runtime: Arc<dyn ScriptExecutor> = Arc::new(StandardRuntime::new(natives.clone()));
        let mempool = Arc::new(Mempool::new(
            config.mempool_capacity,
            config.max_transactions_per_sender,
            events.clone(),
        ));
        let chain = Self {
            config,
            store,
            mempool,
            natives,
            runtime,
            events,
            orphans: Mutex::new(OrphanCache::default()),
            persist_lock: Mutex::new(()),
        };
        chain.bootstrap_genesis()?;
        Ok(chain)
    }

    fn bootstrap_genesis(&self) -> Result<(), ChainError> {
        if self.store.height()?.is_some() {
            return Ok(());
        }
        let block = genesis_block(&self.config);
        let mut snapshot = self.store.snapshot()?;
        self.natives
            .genesis_initialize(&mut snapshot)
            .map_err(|e| ChainError::Fatal(format!("genesis initialization failed: {e}")))?;
        self.store.stage_block(&mut snapshot, &block);
        self.store
            .commit(snapshot.take_batch())
            .map_err(|e| ChainError::Fatal(format!("genesis commit failed: {e}")))?;
        info!(hash = %block.hash(), "genesis block persisted");
        self.events.emit(NodeEvent::BlockPersisted {
            height: 0,
            hash: block.hash(),
        });
        Ok(())
    }

    pub fn config(&self) -> &Arc<ProtocolConfig> {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn runtime(&self) -> &Arc<dyn ScriptExecutor> {
        &self.runtime
    }

    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.natives
    }

    /// Current chain height. Genesis is persisted in `new`, so an empty
    /// store can only mean corruption.
    pub fn height(&self) -> Result<u32, ChainError> {
        self.store
            .height()?
            .ok_or_else(|| ChainError::Fatal("store lost the chain tip".into()))
    }

    pub fn tip_hash(&self) -> Result<UInt256, ChainError> {
        self.store
            .current_hash()?
            .ok_or_else(|| ChainError::Fatal("store lost the chain tip".into()))
    }

    pub fn tip_header(&self) -> Result<Header, ChainError> {
        let hash = self.tip_hash()?;
        self.store
            .get_header(&hash)?
            .ok_or_else(|| ChainError::Fatal("tip header missing from store".into()))
    }

    /// Submits a transaction to the pool. All rejections are synchronous.
    pub fn add_transaction(&self, tx: Transaction) -> Result<UInt256, MempoolError> {
        let hash = tx.hash();
        self.mempool.try_add(tx, self)?;
        Ok(hash)
    }

    // Lock helpers: a poisoned lock means a panic mid-persist, which is
    // unrecoverable anyway.
    #[allow(clippy::unwrap_used)]
    fn persist_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.persist_lock.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn orphans_lock(&self) -> std::sync::MutexGuard<'_, OrphanCache> {
        self.orphans.lock().unwrap()
    }

    /// Ingests a block. Exactly one block per height ever commits; all
    /// verification failures abort with nothing written.
    pub fn add_block(&self, block: Block, origin: BlockOrigin) -> Result<(), ChainError> {
        let _guard = self.persist_guard();
        self.add_block_locked(block, origin)?;

        // Connect any orphan waiting on the new tip, then its descendants.
        loop {
            let tip = self.tip_hash()?;
            let child = self.orphans_lock().take_child_of(&tip);
            match child {
                Some(child) => {
                    let index = child.index();
                    if let Err(error) = self.add_block_locked(child, BlockOrigin::Network) {
                        debug!(index, %error, "orphaned child failed to connect");
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    fn add_block_locked(&self, block: Block, origin: BlockOrigin) -> Result<(), ChainError> {
        let height = self.height()?;
        let hash = block.hash();

        if block.index() <= height {
            let known = self.store.get_block_hash(block.index())?;
            return if known == Some(hash) {
                Err(ChainError::AlreadyPersisted(hash))
            } else {
                Err(InvalidBlockError::NonSequentialIndex {
                    expected: height + 1,
                    got: block.index(),
                }
                .into())
            };
        }
        if block.index() > height + 1 {
            debug!(index = block.index(), height, "holding orphan block");
            self.orphans_lock().insert(block);
            return Err(ChainError::ParentNotFound);
        }

        let prev = self.tip_header()?;
        if block.prev_hash() != prev.hash() {
            return Err(InvalidBlockError::PrevHashMismatch.into());
        }

        self.verify_block(&block, &prev, origin)?;
        let logs = self.execute_and_commit(&block)?;

        for log in &logs {
            if !log.result.success {
                debug!(
                    tx = %log.tx_hash,
                    exception = log.result.exception.as_deref().unwrap_or(""),
                    "transaction faulted, fee retained"
                );
            }
        }

        let included: Vec<UInt256> = block.transactions.iter().map(Transaction::hash).collect();
        self.mempool
            .on_block_persisted(&included, block.index(), REVERIFY_BATCH, self);
        self.events.emit(NodeEvent::BlockPersisted {
            height: block.index(),
            hash,
        });
        info!(
            height = block.index(),
            %hash,
            txs = included.len(),
            ?origin,
            "block persisted"
        );
        Ok(())
    }

    /// The §-ordered verification checklist. `prev` is the verified parent.
    fn verify_block(
        &self,
        block: &Block,
        prev: &Header,
        origin: BlockOrigin,
    ) -> Result<(), ChainError> {
        // 1. Structural.
        let size = block.size();
        if size > self.config.max_block_size as usize {
            return Err(InvalidBlockError::OversizeBlock {
                size,
                cap: self.config.max_block_size as usize,
            }
            .into());
        }
        if block.header.timestamp <= prev.timestamp {
            return Err(InvalidBlockError::TimestampNotMonotonic {
                parent: prev.timestamp,
                got: block.header.timestamp,
            }
            .into());
        }
        let local = now_ms();
        if block.header.timestamp > local + self.config.max_clock_drift_ms {
            return Err(InvalidBlockError::TimestampTooFarAhead {
                local,
                got: block.header.timestamp,
            }
            .into());
        }
        let validators = self.config.validator_set();
        if !validators.is_empty() && usize::from(block.header.primary_index) >= validators.len() {
            return Err(InvalidBlockError::PrimaryIndexOutOfRange {
                index: block.header.primary_index,
                validators: validators.len(),
            }
            .into());
        }

        // 2. Witness, against the consensus address the parent committed to.
        // Locally assembled blocks carry the quorum the engine verified.
        if origin == BlockOrigin::Network {
            let witness = &block.header.witness;
            let authorized = witness
                .script_hash()
                .is_some_and(|script_hash| script_hash == prev.next_consensus)
                && self.runtime.verify_witness(
                    self.config.network_magic,
                    &block.hash(),
                    &prev.next_consensus,
                    witness,
                );
            if !authorized {
                return Err(InvalidBlockError::InvalidBlockWitness.into());
            }
        }

        // 3. Transactions.
        let mut seen = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let hash = tx.hash();
            if !seen.insert(hash) {
                return Err(InvalidBlockError::DuplicateTransaction(hash).into());
            }
            if self.store.contains_transaction(&hash)? {
                return Err(InvalidBlockError::DuplicateTransaction(hash).into());
            }
        }
        if block.compute_merkle_root() != block.header.merkle_root {
            return Err(InvalidBlockError::MerkleRootMismatch.into());
        }
        let total_fee = block.total_system_fee();
        if total_fee > self.config.max_block_system_fee {
            return Err(InvalidBlockError::SystemFeeExceeded {
                total: total_fee,
                cap: self.config.max_block_system_fee,
            }
            .into());
        }
        for tx in &block.transactions {
            for target in tx.conflicts() {
                if seen.contains(&target) {
                    return Err(
                        InvalidBlockError::ConflictingTransactions(tx.hash(), target).into()
                    );
                }
                if self.store.contains_transaction(&target)? {
                    return Err(
                        InvalidBlockError::ConflictingTransactions(tx.hash(), target).into()
                    );
                }
            }
        }
        let snapshot = self.store.snapshot()?;
        for tx in &block.transactions {
            self.verify_transaction(tx, block.index().saturating_sub(1), &snapshot)
                .map_err(|e| InvalidBlockError::InvalidTransaction(tx.hash(), e))?;
        }
        Ok(())
    }

    /// Stateful transaction verification shared by pool admission and block
    /// verification. `height` is the chain height the transaction must
    /// still be valid after.
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        height: u32,
        snapshot: &Snapshot,
    ) -> Result<(), InvalidTransactionError> {
        if tx.valid_until_block < height + 1 {
            return Err(InvalidTransactionError::Expired {
                valid_until: tx.valid_until_block,
                height,
            });
        }
        if tx.valid_until_block > self.config.max_valid_until(height) {
            return Err(InvalidTransactionError::TooFarInFuture {
                valid_until: tx.valid_until_block,
                height,
            });
        }
        if let Some(not_before) = tx.not_valid_before() {
            if height + 1 < not_before {
                return Err(InvalidTransactionError::NotYetValid {
                    not_before,
                    height,
                });
            }
        }
        if tx.system_fee > self.config.max_block_system_fee {
            return Err(InvalidTransactionError::SystemFeeTooLarge);
        }

        let sender = tx
            .sender()
            .ok_or(InvalidTransactionError::InvalidWitness { index: 0 })?;
        if policy::is_account_blocked(snapshot, &sender).unwrap_or(true) {
            return Err(InvalidTransactionError::SenderBlocked);
        }
        let floor = policy::fee_per_byte(snapshot).unwrap_or(policy::DEFAULT_FEE_PER_BYTE);
        if tx.fee_per_byte() < floor {
            return Err(InvalidTransactionError::InsufficientNetworkFee);
        }
        let balance = gas_token::balance(snapshot, &sender).unwrap_or(0);
        if balance < tx.network_fee + tx.system_fee {
            return Err(InvalidTransactionError::InsufficientFunds);
        }

        let hash = tx.hash();
        for (index, (signer, witness)) in tx.signers.iter().zip(&tx.witnesses).enumerate() {
            if !self.runtime.verify_witness(
                self.config.network_magic,
                &hash,
                &signer.account,
                witness,
            ) {
                return Err(InvalidTransactionError::InvalidWitness { index });
            }
        }
        Ok(())
    }

    /// Runs the block and commits everything in one batch: `onPersist`
    /// hooks, the transactions in proposer order with per-transaction
    /// revert on fault, `postPersist` hooks, ledger records.
    fn execute_and_commit(&self, block: &Block) -> Result<Vec<ApplicationLog>, ChainError> {
        let mut snapshot = self.store.snapshot()?;
        let persisting = self.persisting_context(block);
        let mut persist_ctx = PersistCtx {
            snapshot: &mut snapshot,
            block,
            persisting: &persisting,
            config: &self.config,
        };
        self.natives
            .on_persist(&mut persist_ctx)
            .map_err(|e| ChainError::Fatal(format!("onPersist failed: {e}")))?;

        let mut logs = Vec::with_capacity(block.transactions.len());
        let policy_before = policy::fee_per_byte(&snapshot)
            .map_err(|e| ChainError::Fatal(format!("policy read failed: {e}")))?;

        for tx in &block.transactions {
            let tx_ctx = TxContext {
                hash: tx.hash(),
                signers: tx.signers.clone(),
                attributes: tx.attributes.clone(),
            };
            let mut overlay = snapshot.fork();
            let result = self.runtime.execute(
                &tx.script,
                tx.system_fee,
                &tx_ctx,
                &persisting,
                &mut overlay,
            );
            if result.success {
                let writes = overlay.into_writes();
                snapshot.apply(writes);
            }
            // Fault path: overlay dropped, storage reverted, fees stay burned.
            logs.push(ApplicationLog {
                tx_hash: tx_ctx.hash,
                result,
            });
        }

        let mut persist_ctx = PersistCtx {
            snapshot: &mut snapshot,
            block,
            persisting: &persisting,
            config: &self.config,
        };
        self.natives
            .post_persist(&mut persist_ctx)
            .map_err(|e| ChainError::Fatal(format!("postPersist failed: {e}")))?;

        let policy_after = policy::fee_per_byte(&snapshot)
            .map_err(|e| ChainError::Fatal(format!("policy read failed: {e}")))?;
        if policy_before != policy_after {
            warn!(
                from = policy_before,
                to = policy_after,
                "fee policy changed in block, scheduling full pool sweep"
            );
            self.mempool.mark_policy_dirty();
        }

        self.store.stage_block(&mut snapshot, block);
        self.store
            .commit(snapshot.take_batch())
            .map_err(|e| ChainError::Fatal(format!("block commit failed: {e}")))?;
        Ok(logs)
    }

    fn persisting_context(&self, block: &Block) -> PersistingBlock {
        let validators = self.config.validator_set();
        let primary_account = validators
            .get(block.header.primary_index)
            .map(|key| UInt160::hash160_of(&single_sig_script(key)))
            .unwrap_or_else(UInt160::zero);
        PersistingBlock {
            index: block.index(),
            timestamp: block.header.timestamp,
            nonce: block.header.nonce,
            hash: block.hash(),
            primary_account,
        }
    }

    /// Accepts headers running ahead of the body chain, up to the window.
    /// Returns how many were newly accepted.
    pub fn add_headers(&self, headers: Vec<Header>) -> Result<usize, ChainError> {
        let _guard = self.persist_guard();

        let height = self.height()?;
        let mut header_height = self
            .store
            .header_height()?
            .ok_or_else(|| ChainError::Fatal("store lost the header tip".into()))?;
        let mut header_tip = self
            .store
            .current_header_hash()?
            .ok_or_else(|| ChainError::Fatal("store lost the header tip".into()))?;

        let mut accepted = 0usize;
        let mut snapshot = self.store.snapshot()?;
        // The previous header may only exist in this batch, so its
        // next_consensus is tracked locally instead of read back.
        let mut prev_next_consensus = match self.store.get_header(&header_tip)? {
            Some(prev) => prev.next_consensus,
            None => return Err(ChainError::Fatal("header tip missing from store".into())),
        };
        for header in headers {
            if header.index <= header_height {
                continue;
            }
            if header.index != header_height + 1 || header.prev_hash != header_tip {
                break;
            }
            if header.index > height + MAX_HEADER_AHEAD {
                return Err(ChainError::HeaderWindowExceeded);
            }
            let witness_ok = header
                .witness
                .script_hash()
                .is_some_and(|h| h == prev_next_consensus)
                && self.runtime.verify_witness(
                    self.config.network_magic,
                    &header.hash(),
                    &prev_next_consensus,
                    &header.witness,
                );
            if !witness_ok {
                return Err(InvalidBlockError::InvalidBlockWitness.into());
            }
            header_tip = header.hash();
            header_height = header.index;
            prev_next_consensus = header.next_consensus;
            self.store.stage_header(&mut snapshot, &header);
            accepted += 1;
        }
        if accepted > 0 {
            self.store
                .commit(snapshot.take_batch())
                .map_err(|e| ChainError::Fatal(format!("header commit failed: {e}")))?;
            debug!(accepted, header_height, "headers accepted");
        }
        Ok(accepted)
    }
}

impl PoolVerifier for Blockchain {
    fn verify_for_pool(&self, tx: &Transaction) -> Result<u32, MempoolError> {
        let height = self.height().map_err(|_| MempoolError::Conflict)?;
        let hash = tx.hash();

        // Already on chain, or conflicting with chained state.
        if self
            .store
            .contains_transaction(&hash)
            .unwrap_or(false)
        {
            return Err(MempoolError::Conflict);
        }
        for target in tx.conflicts() {
            if self.store.contains_transaction(&target).unwrap_or(false) {
                return Err(MempoolError::Conflict);
            }
        }

        let snapshot = self
            .store
            .snapshot()
            .map_err(|_| MempoolError::Conflict)?;

        // Sender must also cover the fees of everything it already has
        // pooled, or the pool becomes a balance-overdraft amplifier.
        if let Some(sender) = tx.sender() {
            let pledged = self.mempool.sender_fee_sum(&sender);
            let balance = gas_token::balance(&snapshot, &sender).unwrap_or(0);
            if balance < pledged + tx.network_fee + tx.system_fee {
                return Err(MempoolError::Invalid(
                    InvalidTransactionError::InsufficientFunds,
                ));
            }
        }

        match self.verify_transaction(tx, height, &snapshot) {
            Ok(()) => Ok(height),
            Err(InvalidTransactionError::InsufficientNetworkFee) => {
                Err(MempoolError::InsufficientFee)
            }
            Err(error) => Err(MempoolError::Invalid(error)),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

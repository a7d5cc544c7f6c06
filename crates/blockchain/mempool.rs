use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use neorex_common::types::{Transaction, UInt160, UInt256};
use tracing::{debug, trace};

use crate::error::MempoolError;
use crate::events::{EventBus, NodeEvent, RemovalReason};

/// Stateful checks the pool delegates to the chain: expiry window, witness
/// verification against a fresh snapshot, fee policy. Runs outside the pool
/// lock.
pub trait PoolVerifier: Send + Sync {
    /// Returns the snapshot height the transaction was verified against.
    fn verify_for_pool(&self, tx: &Transaction) -> Result<u32, MempoolError>;
}

/// A pooled transaction with its admission-time ordering data.
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Arc<Transaction>,
    pub hash: UInt256,
    pub fee_per_byte: i64,
    pub high_priority: bool,
    pub verified_at_height: u32,
    arrival: u64,
}

impl PooledTransaction {
    /// Monotonic admission sequence number.
    pub fn arrival(&self) -> u64 {
        self.arrival
    }
}

/// Ordering key: high-priority first, then fee-per-byte descending, then
/// hash ascending so every honest primary proposes the same sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolKey {
    high_priority: bool,
    fee_per_byte: i64,
    hash: UInt256,
}

impl PoolKey {
    fn of(entry: &PooledTransaction) -> Self {
        Self {
            high_priority: entry.high_priority,
            fee_per_byte: entry.fee_per_byte,
            hash: entry.hash,
        }
    }
}

impl Ord for PoolKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .high_priority
            .cmp(&self.high_priority)
            .then(other.fee_per_byte.cmp(&self.fee_per_byte))
            .then(self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PoolKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: HashMap<UInt256, PooledTransaction>,
    sorted: BTreeSet<PoolKey>,
    by_sender: HashMap<UInt160, BTreeSet<UInt256>>,
    /// Conflict target hash -> pooled claimants declaring it.
    conflict_claims: HashMap<UInt256, HashSet<UInt256>>,
    sender_fees: HashMap<UInt160, i64>,
    arrivals: u64,
    policy_dirty: bool,
    reverify_drops: u64,
}

impl PoolInner {
    fn insert(&mut self, entry: PooledTransaction) {
        self.sorted.insert(PoolKey::of(&entry));
        if let Some(sender) = entry.tx.sender() {
            self.by_sender.entry(sender).or_default().insert(entry.hash);
            *self.sender_fees.entry(sender).or_default() +=
                entry.tx.network_fee + entry.tx.system_fee;
        }
        for target in entry.tx.conflicts() {
            self.conflict_claims
                .entry(target)
                .or_default()
                .insert(entry.hash);
        }
        self.entries.insert(entry.hash, entry);
    }

    fn remove(&mut self, hash: &UInt256) -> Option<PooledTransaction> {
        let entry = self.entries.remove(hash)?;
        self.sorted.remove(&PoolKey::of(&entry));
        if let Some(sender) = entry.tx.sender() {
            if let Some(hashes) = self.by_sender.get_mut(&sender) {
                hashes.remove(hash);
                if hashes.is_empty() {
                    self.by_sender.remove(&sender);
                }
            }
            if let Some(fees) = self.sender_fees.get_mut(&sender) {
                *fees -= entry.tx.network_fee + entry.tx.system_fee;
                if *fees <= 0 {
                    self.sender_fees.remove(&sender);
                }
            }
        }
        for target in entry.tx.conflicts() {
            if let Some(claimants) = self.conflict_claims.get_mut(&target) {
                claimants.remove(hash);
                if claimants.is_empty() {
                    self.conflict_claims.remove(&target);
                }
            }
        }
        Some(entry)
    }

    /// Worst entry by ordering: the eviction candidate.
    fn floor(&self) -> Option<&PoolKey> {
        self.sorted.iter().next_back()
    }
}

/// The verified-pending transaction pool.
///
/// One mutex guards the ordered index and the hash map; witness
/// verification happens outside it on a cloned snapshot reference and the
/// stateful admission checks are re-applied under the lock on insert.
#[derive(Debug)]
pub struct Mempool {
    capacity: usize,
    per_sender_cap: usize,
    events: EventBus,
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new(capacity: usize, per_sender_cap: usize, events: EventBus) -> Self {
        Self {
            capacity,
            per_sender_cap,
            events,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.lock().entries.contains_key(hash)
    }

    pub fn count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn get(&self, hash: &UInt256) -> Option<Arc<Transaction>> {
        self.lock().entries.get(hash).map(|e| e.tx.clone())
    }

    /// Pooled hashes for one sender, admission order not guaranteed.
    pub fn iter_by_sender(&self, sender: &UInt160) -> Vec<UInt256> {
        self.lock()
            .by_sender
            .get(sender)
            .map(|hashes| hashes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Aggregate fees currently pledged by a sender's pooled transactions.
    pub fn sender_fee_sum(&self, sender: &UInt160) -> i64 {
        self.lock().sender_fees.get(sender).copied().unwrap_or(0)
    }

    /// All pooled hashes in selection order.
    pub fn sorted_hashes(&self) -> Vec<UInt256> {
        let inner = self.lock();
        inner.sorted.iter().map(|key| key.hash).collect()
    }

    /// Hashes from `candidates` the pool does not already hold.
    pub fn filter_unknown(&self, candidates: &[UInt256]) -> Vec<UInt256> {
        let inner = self.lock();
        candidates
            .iter()
            .filter(|hash| !inner.entries.contains_key(hash))
            .copied()
            .collect()
    }

    /// Count of dropped entries from re-verification sweeps.
    pub fn reverify_drops(&self) -> u64 {
        self.lock().reverify_drops
    }

    /// Full admission path. Witness verification runs through `verifier`
    /// outside the lock; conflict, sender-cap and capacity rules are then
    /// re-checked and applied inside it.
    pub fn try_add(
        &self,
        tx: Transaction,
        verifier: &dyn PoolVerifier,
    ) -> Result<(), MempoolError> {
        let hash = tx.hash();

        // Cheap duplicate test before paying for verification.
        if self.contains(&hash) {
            return Err(MempoolError::Conflict);
        }

        let verified_at_height = verifier.verify_for_pool(&tx)?;

        let entry = PooledTransaction {
            fee_per_byte: tx.fee_per_byte(),
            high_priority: tx.is_high_priority(),
            hash,
            verified_at_height,
            arrival: 0,
            tx: Arc::new(tx),
        };

        let evicted = {
            let mut inner = self.lock();
            if inner.entries.contains_key(&hash) {
                return Err(MempoolError::Conflict);
            }
            // A pooled transaction claiming our hash, or us claiming a
            // pooled hash, is a conflict either way.
            if inner.conflict_claims.contains_key(&hash) {
                return Err(MempoolError::Conflict);
            }
            if entry.tx.conflicts().any(|t| inner.entries.contains_key(&t)) {
                return Err(MempoolError::Conflict);
            }
            if let Some(sender) = entry.tx.sender() {
                let pooled = inner.by_sender.get(&sender).map_or(0, BTreeSet::len);
                if pooled >= self.per_sender_cap {
                    return Err(MempoolError::Conflict);
                }
            }

            let mut evicted = None;
            if inner.entries.len() >= self.capacity {
                // Fee monotonicity: only an entry with strictly lower
                // fee-per-byte (and no priority flag the candidate lacks)
                // may be evicted.
                let victim = inner.floor().and_then(|floor| {
                    let outbid = floor.fee_per_byte < entry.fee_per_byte
                        || (entry.high_priority && !floor.high_priority);
                    (outbid && !(floor.high_priority && !entry.high_priority))
                        .then_some(floor.hash)
                });
                match victim {
                    Some(victim) => evicted = inner.remove(&victim),
                    None => return Err(MempoolError::PoolFull),
                }
            }

            inner.arrivals += 1;
            let mut entry = entry;
            entry.arrival = inner.arrivals;
            inner.insert(entry);
            evicted
        };

        if let Some(victim) = evicted {
            debug!(victim = %victim.hash, fee_per_byte = victim.fee_per_byte, "evicted for higher-fee transaction");
            self.events.emit(NodeEvent::TxRemoved {
                hash: victim.hash,
                reason: RemovalReason::Evicted,
            });
        }
        self.events.emit(NodeEvent::TxAdded { hash });
        trace!(%hash, "transaction admitted to pool");
        Ok(())
    }

    /// Removes `hashes` (block drain, TTL sweep), reporting `reason` to
    /// observers. Returns how many entries actually left.
    pub fn remove(&self, hashes: &[UInt256], reason: RemovalReason) -> usize {
        let removed: Vec<UInt256> = {
            let mut inner = self.lock();
            hashes
                .iter()
                .filter(|hash| inner.remove(hash).is_some())
                .copied()
                .collect()
        };
        for hash in &removed {
            self.events.emit(NodeEvent::TxRemoved {
                hash: *hash,
                reason,
            });
        }
        removed.len()
    }

    /// Ordered selection for the primary proposer. Entries expired at
    /// `height + 1` are skipped, removed, and reported.
    pub fn get_sorted(
        &self,
        limit: usize,
        max_bytes: usize,
        max_system_fee: i64,
        height: u32,
    ) -> Vec<Arc<Transaction>> {
        let mut selected = Vec::new();
        let mut expired = Vec::new();
        {
            let inner = self.lock();
            let mut total_bytes = 0usize;
            let mut total_system_fee = 0i64;
            for key in &inner.sorted {
                let Some(entry) = inner.entries.get(&key.hash) else {
                    continue;
                };
                if entry.tx.valid_until_block < height + 1 {
                    expired.push(entry.hash);
                    continue;
                }
                if selected.len() >= limit {
                    break;
                }
                let size = entry.tx.size();
                if total_bytes + size > max_bytes {
                    continue;
                }
                if total_system_fee + entry.tx.system_fee > max_system_fee {
                    continue;
                }
                total_bytes += size;
                total_system_fee += entry.tx.system_fee;
                selected.push(entry.tx.clone());
            }
        }
        if !expired.is_empty() {
            self.remove(&expired, RemovalReason::Expired);
        }
        selected
    }

    /// Marks the pool for a full re-verification sweep after the next
    /// persist; set when on-chain policy mutates.
    pub fn mark_policy_dirty(&self) {
        self.lock().policy_dirty = true;
    }

    /// Post-persist maintenance: drain included transactions and everything
    /// conflicting with them, drop expired entries, then re-verify a
    /// bounded batch (or the whole pool after a policy change) against the
    /// new snapshot. Re-verify failures are dropped silently apart from a
    /// counter.
    pub fn on_block_persisted(
        &self,
        included: &[UInt256],
        height: u32,
        reverify_limit: usize,
        verifier: &dyn PoolVerifier,
    ) {
        let mut conflicting = Vec::new();
        {
            let inner = self.lock();
            for hash in included {
                if let Some(claimants) = inner.conflict_claims.get(hash) {
                    conflicting.extend(claimants.iter().copied());
                }
            }
        }
        self.remove(included, RemovalReason::Included);
        if !conflicting.is_empty() {
            self.remove(&conflicting, RemovalReason::Conflict);
        }

        let expired: Vec<UInt256> = {
            let inner = self.lock();
            inner
                .entries
                .values()
                .filter(|entry| entry.tx.valid_until_block < height + 1)
                .map(|entry| entry.hash)
                .collect()
        };
        if !expired.is_empty() {
            self.remove(&expired, RemovalReason::Expired);
        }

        let (candidates, full_sweep) = {
            let mut inner = self.lock();
            let full_sweep = inner.policy_dirty;
            inner.policy_dirty = false;
            let limit = if full_sweep { usize::MAX } else { reverify_limit };
            let candidates: Vec<Arc<Transaction>> = inner
                .sorted
                .iter()
                .take(limit.min(inner.entries.len()))
                .filter_map(|key| inner.entries.get(&key.hash))
                .map(|entry| entry.tx.clone())
                .collect();
            (candidates, full_sweep)
        };

        let mut failed = Vec::new();
        for tx in &candidates {
            if verifier.verify_for_pool(tx).is_err() {
                failed.push(tx.hash());
            }
        }
        if !failed.is_empty() {
            debug!(
                dropped = failed.len(),
                full_sweep, "re-verification dropped pooled transactions"
            );
            self.lock().reverify_drops += failed.len() as u64;
            self.remove(&failed, RemovalReason::ReverifyFailed);
        }
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // Poisoning means a panic mid-mutation; the pool is unrecoverable
        // and the process is already coming down.
        self.inner.lock().unwrap()
    }
}

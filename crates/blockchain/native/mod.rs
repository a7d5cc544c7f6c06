//! Built-in contracts with fixed negative ids.
//!
//! Natives are a data-driven dispatch table instead of an inheritance tree:
//! each contract is a struct of method descriptors plus persist hooks, and
//! the registry is the only place that knows them all. Methods gated behind
//! a hardfork simply don't resolve before its activation height.

pub mod gas_token;
pub mod neo_token;
pub mod oracle;
pub mod policy;
pub mod role_management;

use std::sync::Arc;

use neorex_common::config::{Hardfork, ProtocolConfig};
use neorex_common::types::{Block, TransactionAttribute, UInt160, UInt256};
use neorex_storage::error::StoreError;
use neorex_storage::{Snapshot, SnapshotOverlay};

use crate::vm::{Notification, TxContext};

pub const POLICY_ID: i32 = -1;
pub const NEO_ID: i32 = -2;
pub const GAS_ID: i32 = -3;
pub const ROLE_MANAGEMENT_ID: i32 = -4;
pub const ORACLE_ID: i32 = -5;

#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    #[error("{0}")]
    Fault(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NativeError {
    pub fn fault(reason: impl Into<String>) -> Self {
        Self::Fault(reason.into())
    }
}

/// The slice of the persisting block natives may observe.
#[derive(Debug, Clone)]
pub struct PersistingBlock {
    pub index: u32,
    pub timestamp: u64,
    pub nonce: u64,
    pub hash: UInt256,
    /// Account of the primary validator that proposed the block.
    pub primary_account: UInt160,
}

/// Context handed to a native method invoked from a transaction script.
pub struct NativeCtx<'a, 'b> {
    pub overlay: &'a mut SnapshotOverlay<'b>,
    pub tx: &'a TxContext,
    pub block: &'a PersistingBlock,
    pub notifications: &'a mut Vec<Notification>,
    pub config: &'a ProtocolConfig,
}

impl NativeCtx<'_, '_> {
    /// Whether the transaction carries an oracle response attribute; the
    /// oracle native's `finish` is only reachable from such transactions.
    pub fn has_oracle_response(&self) -> bool {
        self.tx
            .attributes
            .iter()
            .any(|a| matches!(a, TransactionAttribute::OracleResponse { .. }))
    }

    /// The committee authority account: methods that mutate policy or
    /// designations require its witness.
    pub fn committee_account(&self) -> Option<UInt160> {
        self.config.validator_set().next_consensus()
    }

    pub fn require_committee_witness(&self) -> Result<(), NativeError> {
        let committee = self
            .committee_account()
            .ok_or_else(|| NativeError::fault("no committee configured"))?;
        if self.tx.has_witness(&committee) {
            Ok(())
        } else {
            Err(NativeError::fault("committee witness required"))
        }
    }
}

/// Context for the block-level persist hooks, which run outside any
/// transaction overlay.
pub struct PersistCtx<'a> {
    pub snapshot: &'a mut Snapshot,
    pub block: &'a Block,
    pub persisting: &'a PersistingBlock,
    pub config: &'a ProtocolConfig,
}

pub type MethodHandler = fn(&mut NativeCtx<'_, '_>, &[u8]) -> Result<Vec<u8>, NativeError>;
pub type PersistHook = fn(&mut PersistCtx<'_>) -> Result<(), NativeError>;

/// One dispatchable native method.
pub struct NativeMethod {
    pub name: &'static str,
    pub gas_cost: i64,
    /// `Some(hf)` means callable only once the hardfork is active.
    pub active_from: Option<Hardfork>,
    pub handler: MethodHandler,
}

/// A registered native contract.
pub struct NativeContract {
    pub id: i32,
    pub name: &'static str,
    pub methods: Vec<NativeMethod>,
    pub on_persist: Option<PersistHook>,
    pub post_persist: Option<PersistHook>,
}

/// The fixed table of native contracts.
pub struct NativeRegistry {
    config: Arc<ProtocolConfig>,
    contracts: Vec<NativeContract>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("contracts", &self.contracts.iter().map(|c| c.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ProtocolConfig::default()))
    }
}

impl NativeRegistry {
    pub fn new(config: Arc<ProtocolConfig>) -> Self {
        Self {
            config,
            contracts: vec![
                policy::contract(),
                neo_token::contract(),
                gas_token::contract(),
                role_management::contract(),
                oracle::contract(),
            ],
        }
    }

    pub fn config(&self) -> &Arc<ProtocolConfig> {
        &self.config
    }

    pub fn contract(&self, id: i32) -> Option<&NativeContract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    /// Resolves a method, honouring hardfork gates at `height`.
    pub fn resolve(&self, id: i32, method: &str, height: u32) -> Option<&NativeMethod> {
        let contract = self.contract(id)?;
        let method = contract.methods.iter().find(|m| m.name == method)?;
        match method.active_from {
            Some(hardfork) if !self.config.is_hardfork_active(hardfork, height) => None,
            _ => Some(method),
        }
    }

    /// Runs every contract's `onPersist`, before the first transaction.
    pub fn on_persist(&self, ctx: &mut PersistCtx<'_>) -> Result<(), NativeError> {
        for contract in &self.contracts {
            if let Some(hook) = contract.on_persist {
                hook(ctx)?;
            }
        }
        Ok(())
    }

    /// Runs every contract's `postPersist`, after the last transaction.
    pub fn post_persist(&self, ctx: &mut PersistCtx<'_>) -> Result<(), NativeError> {
        for contract in &self.contracts {
            if let Some(hook) = contract.post_persist {
                hook(ctx)?;
            }
        }
        Ok(())
    }

    /// Seeds native storage at genesis: policy defaults, token supplies,
    /// the committee registration.
    pub fn genesis_initialize(&self, snapshot: &mut Snapshot) -> Result<(), NativeError> {
        policy::initialize(snapshot)?;
        neo_token::initialize(snapshot, &self.config)?;
        gas_token::initialize(snapshot, &self.config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_the_fixed_ids() {
        let registry = NativeRegistry::default();
        for id in [POLICY_ID, NEO_ID, GAS_ID, ROLE_MANAGEMENT_ID, ORACLE_ID] {
            assert!(registry.contract(id).is_some(), "missing native {id}");
        }
        assert!(registry.contract(0).is_none());
        assert!(registry.contract(1).is_none());
    }

    #[test]
    fn resolve_finds_known_methods() {
        let registry = NativeRegistry::default();
        assert!(registry.resolve(POLICY_ID, "getFeePerByte", 0).is_some());
        assert!(registry.resolve(GAS_ID, "transfer", 0).is_some());
        assert!(registry.resolve(GAS_ID, "mintToSelf", 0).is_none());
    }

    #[test]
    fn hardfork_gated_method_resolves_only_after_activation() {
        let mut config = ProtocolConfig::default();
        config.hardforks.insert(Hardfork::Echidna, 50);
        let registry = NativeRegistry::new(Arc::new(config));

        // setMillisecondsPerBlock arrives with Echidna.
        assert!(registry
            .resolve(POLICY_ID, "setMillisecondsPerBlock", 0)
            .is_none());
        assert!(registry
            .resolve(POLICY_ID, "setMillisecondsPerBlock", 49)
            .is_none());
        assert!(registry
            .resolve(POLICY_ID, "setMillisecondsPerBlock", 50)
            .is_some());

        // Without the hardfork configured the method never activates.
        let ungated = NativeRegistry::default();
        assert!(ungated
            .resolve(POLICY_ID, "setMillisecondsPerBlock", u32::MAX)
            .is_none());
    }
}

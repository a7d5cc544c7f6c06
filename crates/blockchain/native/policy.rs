//! Policy native contract (id -1): network-wide fee and limit knobs plus
//! the blocked-account list. Mutations require the committee witness.

use neorex_common::config::Hardfork;
use neorex_common::types::UInt160;
use neorex_io::{NeoDecode, NeoEncode};
use neorex_storage::{keys, Snapshot, StorageRw};

use super::{NativeContract, NativeCtx, NativeError, NativeMethod, POLICY_ID};

const PREFIX_FEE_PER_BYTE: u8 = 0x0a;
const PREFIX_MS_PER_BLOCK: u8 = 0x0b;
const PREFIX_BLOCKED: u8 = 0x0f;

pub const DEFAULT_FEE_PER_BYTE: i64 = 1_000;

pub fn contract() -> NativeContract {
    NativeContract {
        id: POLICY_ID,
        name: "PolicyContract",
        methods: vec![
            NativeMethod {
                name: "getFeePerByte",
                gas_cost: 1 << 15,
                active_from: None,
                handler: get_fee_per_byte,
            },
            NativeMethod {
                name: "setFeePerByte",
                gas_cost: 1 << 15,
                active_from: None,
                handler: set_fee_per_byte,
            },
            NativeMethod {
                name: "isBlocked",
                gas_cost: 1 << 15,
                active_from: None,
                handler: is_blocked,
            },
            NativeMethod {
                name: "blockAccount",
                gas_cost: 1 << 15,
                active_from: None,
                handler: block_account,
            },
            NativeMethod {
                name: "unblockAccount",
                gas_cost: 1 << 15,
                active_from: None,
                handler: unblock_account,
            },
            NativeMethod {
                name: "setMillisecondsPerBlock",
                gas_cost: 1 << 15,
                active_from: Some(Hardfork::Echidna),
                handler: set_ms_per_block,
            },
        ],
        on_persist: None,
        post_persist: None,
    }
}

/// Seeds the policy defaults at genesis.
pub fn initialize(snapshot: &mut Snapshot) -> Result<(), NativeError> {
    snapshot.put(
        keys::storage_item(POLICY_ID, &[PREFIX_FEE_PER_BYTE]),
        DEFAULT_FEE_PER_BYTE.encode_to_vec(),
    );
    Ok(())
}

/// Current fee-per-byte floor, readable from any view.
pub fn fee_per_byte<V: StorageRw>(view: &V) -> Result<i64, NativeError> {
    match view.get(&keys::storage_item(POLICY_ID, &[PREFIX_FEE_PER_BYTE]))? {
        Some(bytes) => Ok(i64::decode(&bytes).map_err(neorex_storage::error::StoreError::from)?),
        None => Ok(DEFAULT_FEE_PER_BYTE),
    }
}

pub fn is_account_blocked<V: StorageRw>(view: &V, account: &UInt160) -> Result<bool, NativeError> {
    Ok(view.get(&blocked_key(account))?.is_some())
}

fn blocked_key(account: &UInt160) -> Vec<u8> {
    let mut key = vec![PREFIX_BLOCKED];
    key.extend_from_slice(account.as_ref());
    keys::storage_item(POLICY_ID, &key)
}

fn get_fee_per_byte(ctx: &mut NativeCtx<'_, '_>, _args: &[u8]) -> Result<Vec<u8>, NativeError> {
    Ok(fee_per_byte(ctx.overlay)?.encode_to_vec())
}

fn set_fee_per_byte(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    let value = i64::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    if !(0..=100_000_000).contains(&value) {
        return Err(NativeError::fault("fee per byte out of range"));
    }
    ctx.overlay.put(
        keys::storage_item(POLICY_ID, &[PREFIX_FEE_PER_BYTE]),
        value.encode_to_vec(),
    );
    Ok(Vec::new())
}

fn set_ms_per_block(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    let value = u64::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    if !(1_000..=30_000).contains(&value) {
        return Err(NativeError::fault("block interval out of range"));
    }
    ctx.overlay.put(
        keys::storage_item(POLICY_ID, &[PREFIX_MS_PER_BLOCK]),
        value.encode_to_vec(),
    );
    Ok(Vec::new())
}

fn is_blocked(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    let account =
        UInt160::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    Ok(vec![u8::from(is_account_blocked(ctx.overlay, &account)?)])
}

fn block_account(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    let account =
        UInt160::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    ctx.overlay.put(blocked_key(&account), Vec::new());
    Ok(Vec::new())
}

fn unblock_account(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    let account =
        UInt160::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    ctx.overlay.delete(blocked_key(&account));
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_storage::{EngineType, Store};

    #[test]
    fn fee_per_byte_defaults_then_reads_storage() {
        let store = Store::new(EngineType::InMemory).expect("open");
        let mut snapshot = store.snapshot().expect("snapshot");
        assert_eq!(fee_per_byte(&snapshot).expect("read"), DEFAULT_FEE_PER_BYTE);

        snapshot.put(
            keys::storage_item(POLICY_ID, &[PREFIX_FEE_PER_BYTE]),
            4_321i64.encode_to_vec(),
        );
        assert_eq!(fee_per_byte(&snapshot).expect("read"), 4_321);
    }

    #[test]
    fn blocked_accounts_round_trip() {
        let store = Store::new(EngineType::InMemory).expect("open");
        let mut snapshot = store.snapshot().expect("snapshot");
        let account = UInt160::from_bytes([3; 20]);

        assert!(!is_account_blocked(&snapshot, &account).expect("read"));
        snapshot.put(blocked_key(&account), Vec::new());
        assert!(is_account_blocked(&snapshot, &account).expect("read"));
    }
}

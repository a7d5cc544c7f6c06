//! NEO token native contract (id -2): the governance token and the
//! committee registry. The validator set itself is fixed per network, so
//! the registry here records it for contract-level reads rather than
//! electing it.

use neorex_common::config::ProtocolConfig;
use neorex_common::types::UInt160;
use neorex_io::{NeoDecode, NeoEncode};
use neorex_storage::{keys, Snapshot, StorageRw};

use super::gas_token::{decode_transfer_args, transfer_notification};
use super::{NativeContract, NativeCtx, NativeError, NativeMethod, NEO_ID};

const PREFIX_ACCOUNT: u8 = 0x14;
const PREFIX_COMMITTEE: u8 = 0x0e;

pub const TOTAL_SUPPLY: i64 = 100_000_000;

pub fn contract() -> NativeContract {
    NativeContract {
        id: NEO_ID,
        name: "NeoToken",
        methods: vec![
            NativeMethod {
                name: "symbol",
                gas_cost: 1 << 10,
                active_from: None,
                handler: |_, _| Ok(b"NEO".to_vec()),
            },
            NativeMethod {
                name: "decimals",
                gas_cost: 1 << 10,
                active_from: None,
                handler: |_, _| Ok(vec![0]),
            },
            NativeMethod {
                name: "totalSupply",
                gas_cost: 1 << 10,
                active_from: None,
                handler: |_, _| Ok(TOTAL_SUPPLY.encode_to_vec()),
            },
            NativeMethod {
                name: "balanceOf",
                gas_cost: 1 << 15,
                active_from: None,
                handler: balance_of,
            },
            NativeMethod {
                name: "transfer",
                gas_cost: 1 << 17,
                active_from: None,
                handler: transfer,
            },
            NativeMethod {
                name: "getCommittee",
                gas_cost: 1 << 16,
                active_from: None,
                handler: get_committee,
            },
            NativeMethod {
                name: "getNextBlockValidators",
                gas_cost: 1 << 16,
                active_from: None,
                handler: get_committee,
            },
        ],
        on_persist: None,
        post_persist: None,
    }
}

pub fn initialize(snapshot: &mut Snapshot, config: &ProtocolConfig) -> Result<(), NativeError> {
    let set = config.validator_set();
    if let Some(committee) = set.next_consensus() {
        snapshot.put(account_key(&committee), TOTAL_SUPPLY.encode_to_vec());
    }
    let mut registry = Vec::with_capacity(set.len() * 33);
    for key in set.keys() {
        registry.extend_from_slice(key);
    }
    snapshot.put(
        keys::storage_item(NEO_ID, &[PREFIX_COMMITTEE]),
        registry,
    );
    Ok(())
}

fn account_key(account: &UInt160) -> Vec<u8> {
    let mut key = vec![PREFIX_ACCOUNT];
    key.extend_from_slice(account.as_ref());
    keys::storage_item(NEO_ID, &key)
}

pub fn balance<V: StorageRw>(view: &V, account: &UInt160) -> Result<i64, NativeError> {
    match view.get(&account_key(account))? {
        Some(bytes) => Ok(i64::decode(&bytes).map_err(neorex_storage::error::StoreError::from)?),
        None => Ok(0),
    }
}

fn balance_of(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    let account =
        UInt160::decode(args).map_err(|e| NativeError::fault(format!("bad args: {e}")))?;
    Ok(balance(ctx.overlay, &account)?.encode_to_vec())
}

fn transfer(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    let (from, to, amount) = decode_transfer_args(args)?;
    if amount < 0 {
        return Err(NativeError::fault("negative transfer amount"));
    }
    if !ctx.tx.has_witness(&from) {
        return Err(NativeError::fault("missing witness for sender"));
    }
    let from_balance = balance(ctx.overlay, &from)?;
    if from_balance < amount {
        return Err(NativeError::fault("insufficient NEO balance"));
    }
    let remaining = from_balance - amount;
    if remaining == 0 {
        ctx.overlay.delete(account_key(&from));
    } else {
        ctx.overlay.put(account_key(&from), remaining.encode_to_vec());
    }
    let to_balance = balance(ctx.overlay, &to)?
        .checked_add(amount)
        .ok_or_else(|| NativeError::fault("balance overflow"))?;
    ctx.overlay.put(account_key(&to), to_balance.encode_to_vec());
    ctx.notifications.push(transfer_notification(NEO_ID, &from, &to, amount));
    Ok(vec![0x01])
}

fn get_committee(ctx: &mut NativeCtx<'_, '_>, _args: &[u8]) -> Result<Vec<u8>, NativeError> {
    Ok(ctx
        .overlay
        .get(&keys::storage_item(NEO_ID, &[PREFIX_COMMITTEE]))?
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_crypto::KeyPair;
    use neorex_storage::{EngineType, Store};

    #[test]
    fn initialize_mints_supply_and_records_committee() {
        let keys: Vec<_> = (0..4).map(|_| KeyPair::generate().public_key()).collect();
        let config = ProtocolConfig {
            standby_validators: keys.clone(),
            ..Default::default()
        };
        let store = Store::new(EngineType::InMemory).expect("open");
        let mut snapshot = store.snapshot().expect("snapshot");
        initialize(&mut snapshot, &config).expect("init");

        let committee = config.validator_set().next_consensus().expect("address");
        assert_eq!(balance(&snapshot, &committee).expect("read"), TOTAL_SUPPLY);

        let registry = snapshot
            .get(&keys::storage_item(NEO_ID, &[PREFIX_COMMITTEE]))
            .expect("read")
            .expect("present");
        assert_eq!(registry.len(), 4 * 33);
    }
}

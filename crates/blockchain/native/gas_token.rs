//! GAS token native contract (id -3): the fee currency.
//!
//! `onPersist` burns each transaction's fees from its sender before any
//! script runs; `postPersist` mints the block's network fees to the primary
//! that proposed it. System fees are burned outright.

use neorex_common::config::ProtocolConfig;
use neorex_common::constants::GAS_FACTOR;
use neorex_common::types::UInt160;
use neorex_io::{NeoDecode, NeoEncode};
use neorex_storage::{keys, Snapshot, StorageRw};

use crate::vm::Notification;

use super::{NativeContract, NativeCtx, NativeError, NativeMethod, PersistCtx, GAS_ID};

const PREFIX_ACCOUNT: u8 = 0x14;

/// 52 million GAS seeded to the committee at genesis.
pub const INITIAL_SUPPLY: i64 = 52_000_000 * GAS_FACTOR;

pub fn contract() -> NativeContract {
    NativeContract {
        id: GAS_ID,
        name: "GasToken",
        methods: vec![
            NativeMethod {
                name: "symbol",
                gas_cost: 1 << 10,
                active_from: None,
                handler: |_, _| Ok(b"GAS".to_vec()),
            },
            NativeMethod {
                name: "decimals",
                gas_cost: 1 << 10,
                active_from: None,
                handler: |_, _| Ok(vec![8]),
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
        ],
        on_persist: Some(on_persist),
        post_persist: Some(post_persist),
    }
}

pub fn initialize(snapshot: &mut Snapshot, config: &ProtocolConfig) -> Result<(), NativeError> {
    if let Some(committee) = config.validator_set().next_consensus() {
        mint(snapshot, &committee, INITIAL_SUPPLY)?;
    }
    Ok(())
}

fn account_key(account: &UInt160) -> Vec<u8> {
    let mut key = vec![PREFIX_ACCOUNT];
    key.extend_from_slice(account.as_ref());
    keys::storage_item(GAS_ID, &key)
}

pub fn balance<V: StorageRw>(view: &V, account: &UInt160) -> Result<i64, NativeError> {
    match view.get(&account_key(account))? {
        Some(bytes) => Ok(i64::decode(&bytes).map_err(neorex_storage::error::StoreError::from)?),
        None => Ok(0),
    }
}

pub fn mint<V: StorageRw>(view: &mut V, account: &UInt160, amount: i64) -> Result<(), NativeError> {
    if amount < 0 {
        return Err(NativeError::fault("negative mint"));
    }
    let new_balance = balance(view, account)?
        .checked_add(amount)
        .ok_or_else(|| NativeError::fault("balance overflow"))?;
    view.put(account_key(account), new_balance.encode_to_vec());
    Ok(())
}

pub fn burn<V: StorageRw>(view: &mut V, account: &UInt160, amount: i64) -> Result<(), NativeError> {
    if amount < 0 {
        return Err(NativeError::fault("negative burn"));
    }
    let current = balance(view, account)?;
    if current < amount {
        return Err(NativeError::fault("insufficient GAS balance"));
    }
    let remaining = current - amount;
    if remaining == 0 {
        view.delete(account_key(account));
    } else {
        view.put(account_key(account), remaining.encode_to_vec());
    }
    Ok(())
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
    burn(ctx.overlay, &from, amount)?;
    mint(ctx.overlay, &to, amount)?;
    ctx.notifications.push(transfer_notification(GAS_ID, &from, &to, amount));
    Ok(vec![0x01])
}

pub fn decode_transfer_args(args: &[u8]) -> Result<(UInt160, UInt160, i64), NativeError> {
    let map = |e| NativeError::fault(format!("bad transfer args: {e}"));
    let (from, rest) = UInt160::decode_unfinished(args).map_err(map)?;
    let (to, rest) = UInt160::decode_unfinished(rest).map_err(map)?;
    let amount = i64::decode(rest).map_err(map)?;
    Ok((from, to, amount))
}

pub fn encode_transfer_args(from: &UInt160, to: &UInt160, amount: i64) -> Vec<u8> {
    let mut args = from.encode_to_vec();
    to.encode(&mut args);
    amount.encode(&mut args);
    args
}

pub fn transfer_notification(
    contract_id: i32,
    from: &UInt160,
    to: &UInt160,
    amount: i64,
) -> Notification {
    Notification {
        contract_id,
        event: "Transfer".into(),
        data: encode_transfer_args(from, to, amount),
    }
}

/// Burn every transaction's fees from its sender up front. A shortfall here
/// means verification let an underfunded sender through, which is an
/// invariant breach, not a per-transaction fault.
fn on_persist(ctx: &mut PersistCtx<'_>) -> Result<(), NativeError> {
    for tx in &ctx.block.transactions {
        let sender = tx
            .sender()
            .ok_or_else(|| NativeError::fault("transaction without signers in block"))?;
        burn(ctx.snapshot, &sender, tx.system_fee + tx.network_fee)?;
    }
    Ok(())
}

/// Pay the block's aggregate network fee to the proposing primary.
fn post_persist(ctx: &mut PersistCtx<'_>) -> Result<(), NativeError> {
    let reward: i64 = ctx.block.transactions.iter().map(|tx| tx.network_fee).sum();
    if reward > 0 {
        mint(ctx.snapshot, &ctx.persisting.primary_account, reward)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_storage::{EngineType, Store};

    fn snapshot() -> Snapshot {
        Store::new(EngineType::InMemory)
            .expect("open")
            .snapshot()
            .expect("snapshot")
    }

    #[test]
    fn mint_then_burn() {
        let mut view = snapshot();
        let account = UInt160::from_bytes([1; 20]);

        mint(&mut view, &account, 500).expect("mint");
        assert_eq!(balance(&view, &account).expect("read"), 500);

        burn(&mut view, &account, 200).expect("burn");
        assert_eq!(balance(&view, &account).expect("read"), 300);

        burn(&mut view, &account, 300).expect("burn to zero");
        assert_eq!(balance(&view, &account).expect("read"), 0);
    }

    #[test]
    fn burn_rejects_overdraft() {
        let mut view = snapshot();
        let account = UInt160::from_bytes([1; 20]);
        mint(&mut view, &account, 100).expect("mint");
        assert!(burn(&mut view, &account, 101).is_err());
        // Balance untouched by the failed burn.
        assert_eq!(balance(&view, &account).expect("read"), 100);
    }

    #[test]
    fn transfer_args_round_trip() {
        let from = UInt160::from_bytes([1; 20]);
        let to = UInt160::from_bytes([2; 20]);
        let args = encode_transfer_args(&from, &to, 77);
        assert_eq!(decode_transfer_args(&args).expect("decode"), (from, to, 77));
    }
}

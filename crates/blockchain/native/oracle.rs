//! Oracle native contract (id -5). The off-chain oracle service is an
//! external collaborator; the native tracks request ids and anchors the
//! response path: `finish` is only reachable from a transaction carrying an
//! `OracleResponse` attribute signed by the designated oracle nodes.

use neorex_io::NeoEncode;
use neorex_storage::keys;

use super::{NativeContract, NativeCtx, NativeError, NativeMethod, ORACLE_ID};

const PREFIX_REQUEST_ID: u8 = 0x09;
const PREFIX_PRICE: u8 = 0x05;

/// Default request price: 0.5 GAS.
pub const DEFAULT_REQUEST_PRICE: i64 = 50_000_000;

pub fn contract() -> NativeContract {
    NativeContract {
        id: ORACLE_ID,
        name: "OracleContract",
        methods: vec![
            NativeMethod {
                name: "getPrice",
                gas_cost: 1 << 15,
                active_from: None,
                handler: get_price,
            },
            NativeMethod {
                name: "setPrice",
                gas_cost: 1 << 15,
                active_from: None,
                handler: set_price,
            },
            NativeMethod {
                name: "request",
                gas_cost: 1 << 15,
                active_from: None,
                handler: request,
            },
            NativeMethod {
                name: "finish",
                gas_cost: 1 << 15,
                active_from: None,
                handler: finish,
            },
        ],
        on_persist: None,
        post_persist: None,
    }
}

fn price_key() -> Vec<u8> {
    keys::storage_item(ORACLE_ID, &[PREFIX_PRICE])
}

fn request_id_key() -> Vec<u8> {
    keys::storage_item(ORACLE_ID, &[PREFIX_REQUEST_ID])
}

fn get_price(ctx: &mut NativeCtx<'_, '_>, _args: &[u8]) -> Result<Vec<u8>, NativeError> {
    let price = match ctx.overlay.get(&price_key())? {
        Some(bytes) if bytes.len() == 8 => i64::from_le_bytes(
            bytes[..8]
                .try_into()
                .map_err(|_| NativeError::fault("corrupt price"))?,
        ),
        Some(_) => return Err(NativeError::fault("corrupt price")),
        None => DEFAULT_REQUEST_PRICE,
    };
    Ok(price.encode_to_vec())
}

fn set_price(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    if args.len() != 8 {
        return Err(NativeError::fault("expected price"));
    }
    let price = i64::from_le_bytes(
        args.try_into()
            .map_err(|_| NativeError::fault("bad price"))?,
    );
    if price <= 0 {
        return Err(NativeError::fault("price must be positive"));
    }
    ctx.overlay.put(price_key(), price.encode_to_vec());
    Ok(Vec::new())
}

/// Allocates the next request id. The request body itself (url, filter,
/// callback) is relayed to the oracle service off-chain.
fn request(ctx: &mut NativeCtx<'_, '_>, _args: &[u8]) -> Result<Vec<u8>, NativeError> {
    let next = match ctx.overlay.get(&request_id_key())? {
        Some(bytes) if bytes.len() == 8 => u64::from_le_bytes(
            bytes[..8]
                .try_into()
                .map_err(|_| NativeError::fault("corrupt request id"))?,
        )
        .checked_add(1)
        .ok_or_else(|| NativeError::fault("request id overflow"))?,
        Some(_) => return Err(NativeError::fault("corrupt request id")),
        None => 1,
    };
    ctx.overlay.put(request_id_key(), next.encode_to_vec());
    Ok(next.encode_to_vec())
}

fn finish(ctx: &mut NativeCtx<'_, '_>, _args: &[u8]) -> Result<Vec<u8>, NativeError> {
    if !ctx.has_oracle_response() {
        return Err(NativeError::fault(
            "finish requires an oracle response transaction",
        ));
    }
    Ok(Vec::new())
}

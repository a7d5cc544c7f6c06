//! Role management native contract (id -4): committee-designated node
//! lists (oracles, state validators), versioned by designation height.

use neorex_io::decode::decode_var_array;
use neorex_storage::{keys, StorageRw};

use super::{NativeContract, NativeCtx, NativeError, NativeMethod, ROLE_MANAGEMENT_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    StateValidator = 4,
    Oracle = 8,
}

impl Role {
    fn from_byte(byte: u8) -> Result<Self, NativeError> {
        match byte {
            4 => Ok(Self::StateValidator),
            8 => Ok(Self::Oracle),
            other => Err(NativeError::fault(format!("unknown role {other}"))),
        }
    }
}

pub fn contract() -> NativeContract {
    NativeContract {
        id: ROLE_MANAGEMENT_ID,
        name: "RoleManagement",
        methods: vec![
            NativeMethod {
                name: "getDesignatedByRole",
                gas_cost: 1 << 15,
                active_from: None,
                handler: get_designated_by_role,
            },
            NativeMethod {
                name: "designateAsRole",
                gas_cost: 1 << 15,
                active_from: None,
                handler: designate_as_role,
            },
        ],
        on_persist: None,
        post_persist: None,
    }
}

/// Designations are stored at `role || height:be32` so a prefix seek yields
/// them in designation order; a query at height H takes the latest entry
/// with key height <= H.
fn designation_key(role: Role, height: u32) -> Vec<u8> {
    let mut key = vec![role as u8];
    key.extend_from_slice(&height.to_be_bytes());
    keys::storage_item(ROLE_MANAGEMENT_ID, &key)
}

fn designate_as_role(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    ctx.require_committee_witness()?;
    let (role_byte, rest) = args
        .split_first()
        .ok_or_else(|| NativeError::fault("missing role"))?;
    let role = Role::from_byte(*role_byte)?;
    let (nodes, rest) = decode_var_array::<[u8; 33]>(rest, 32)
        .map_err(|e| NativeError::fault(format!("bad node list: {e}")))?;
    if !rest.is_empty() {
        return Err(NativeError::fault("trailing bytes in designation"));
    }
    if nodes.is_empty() {
        return Err(NativeError::fault("empty designation"));
    }
    for node in &nodes {
        neorex_crypto::ecdsa::validate_public_key(node)
            .map_err(|_| NativeError::fault("invalid designated key"))?;
    }
    // Effective from the next block, like every committee action.
    let effective = ctx.block.index + 1;
    let mut value = Vec::with_capacity(nodes.len() * 33);
    for node in &nodes {
        value.extend_from_slice(node);
    }
    ctx.overlay.put(designation_key(role, effective), value);

    let mut heights = designation_heights(ctx.overlay, role)?;
    if heights.last() != Some(&effective) {
        heights.push(effective);
        let mut encoded = Vec::with_capacity(heights.len() * 4);
        for height in &heights {
            encoded.extend_from_slice(&height.to_be_bytes());
        }
        ctx.overlay.put(heights_key(role), encoded);
    }
    Ok(Vec::new())
}

fn heights_key(role: Role) -> Vec<u8> {
    keys::storage_item(ROLE_MANAGEMENT_ID, &[role as u8])
}

/// Ascending list of heights at which this role was (re)designated.
fn designation_heights<V: StorageRw>(view: &V, role: Role) -> Result<Vec<u32>, NativeError> {
    let Some(bytes) = view.get(&heights_key(role))? else {
        return Ok(Vec::new());
    };
    if bytes.len() % 4 != 0 {
        return Err(NativeError::fault("corrupt designation index"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn get_designated_by_role(ctx: &mut NativeCtx<'_, '_>, args: &[u8]) -> Result<Vec<u8>, NativeError> {
    if args.len() != 5 {
        return Err(NativeError::fault("expected role and height"));
    }
    let role = Role::from_byte(args[0])?;
    let height = u32::from_le_bytes([args[1], args[2], args[3], args[4]]);

    let heights = designation_heights(ctx.overlay, role)?;
    let Some(effective) = heights.iter().rev().find(|h| **h <= height) else {
        return Ok(Vec::new());
    };
    Ok(ctx
        .overlay
        .get(&designation_key(role, *effective))?
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing() {
        assert_eq!(Role::from_byte(4).expect("role"), Role::StateValidator);
        assert_eq!(Role::from_byte(8).expect("role"), Role::Oracle);
        assert!(Role::from_byte(0).is_err());
    }

    #[test]
    fn designation_keys_order_by_height() {
        assert!(designation_key(Role::Oracle, 1) < designation_key(Role::Oracle, 2));
        assert_ne!(
            designation_key(Role::Oracle, 1),
            designation_key(Role::StateValidator, 1)
        );
    }
}

//! Script execution seam.
//!
//! The full NeoVM interpreter is an external collaborator. What the core
//! executes itself is the two script families it must understand to make
//! progress: standard signature witnesses (single-sig and multi-sig) and
//! the canonical native-contract invocation shape. Everything else faults
//! deterministically, which still charges fees and keeps replicas in
//! lockstep.

use neorex_common::signing::signing_data;
use neorex_common::types::{
    parse_verification_script, Signer, TransactionAttribute, UInt160, UInt256,
    VerificationContract, Witness, WitnessScopes,
};
use neorex_crypto::{sha256, verify_signature};
use neorex_io::decode::{read_var_bytes, read_var_string};
use neorex_io::encode::{write_var_bytes, write_var_string};
use neorex_storage::SnapshotOverlay;

use crate::native::{NativeError, NativeRegistry, PersistingBlock};

const OP_PUSHDATA1: u8 = 0x0c;
const OP_SYSCALL: u8 = 0x41;
const SIGNATURE_LEN: u8 = 64;

const CALL_NATIVE: &str = "System.Contract.CallNative";
const MAX_METHOD_NAME: usize = 64;
const MAX_CALL_ARGS: usize = 0xffff;

/// Outcome of one application script.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub gas_consumed: i64,
    pub return_value: Vec<u8>,
    pub exception: Option<String>,
    pub notifications: Vec<Notification>,
}

impl ExecutionResult {
    pub fn fault(gas_consumed: i64, exception: impl Into<String>) -> Self {
        Self {
            success: false,
            gas_consumed,
            return_value: Vec::new(),
            exception: Some(exception.into()),
            notifications: Vec::new(),
        }
    }
}

/// Application-log style notification emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub contract_id: i32,
    pub event: String,
    pub data: Vec<u8>,
}

/// The transaction being executed, as scripts see it.
#[derive(Debug, Clone)]
pub struct TxContext {
    pub hash: UInt256,
    pub signers: Vec<Signer>,
    pub attributes: Vec<TransactionAttribute>,
}

impl TxContext {
    /// CheckWitness for an entry-level native call: the account must be a
    /// signer whose scope admits the call. Witness signatures themselves
    /// were verified before execution started.
    pub fn has_witness(&self, account: &UInt160) -> bool {
        self.signers.iter().any(|signer| {
            signer.account == *account
                && (signer.scopes.has(WitnessScopes::GLOBAL)
                    || signer.scopes.has(WitnessScopes::CALLED_BY_ENTRY)
                    || signer.scopes.has(WitnessScopes::WITNESS_RULES))
        })
    }
}

/// Execution backend the blockchain executor drives.
pub trait ScriptExecutor: Send + Sync {
    /// Runs an application script against the transaction's overlay with a
    /// hard gas limit. Must be deterministic across replicas.
    fn execute(
        &self,
        script: &[u8],
        gas_limit: i64,
        tx: &TxContext,
        block: &PersistingBlock,
        overlay: &mut SnapshotOverlay<'_>,
    ) -> ExecutionResult;

    /// Verifies one witness against the expected script hash, with the
    /// signature domain bound to `network_magic || payload_hash`.
    fn verify_witness(
        &self,
        network_magic: u32,
        payload_hash: &UInt256,
        expected: &UInt160,
        witness: &Witness,
    ) -> bool;
}

/// The built-in runtime: standard witnesses plus native dispatch.
#[derive(Debug, Default)]
pub struct StandardRuntime {
    natives: std::sync::Arc<NativeRegistry>,
}

impl StandardRuntime {
    pub fn new(natives: std::sync::Arc<NativeRegistry>) -> Self {
        Self { natives }
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }
}

impl ScriptExecutor for StandardRuntime {
    fn execute(
        &self,
        script: &[u8],
        gas_limit: i64,
        tx: &TxContext,
        block: &PersistingBlock,
        overlay: &mut SnapshotOverlay<'_>,
    ) -> ExecutionResult {
        let call = match parse_native_call(script) {
            Ok(call) => call,
            Err(reason) => return ExecutionResult::fault(0, reason),
        };
        let method = match self
            .natives
            .resolve(call.contract_id, &call.method, block.index)
        {
            Some(method) => method,
            None => {
                return ExecutionResult::fault(
                    0,
                    format!("unknown native method {}::{}", call.contract_id, call.method),
                )
            }
        };
        if method.gas_cost > gas_limit {
            return ExecutionResult::fault(gas_limit, "insufficient gas for native call");
        }
        let mut notifications = Vec::new();
        let mut ctx = crate::native::NativeCtx {
            overlay,
            tx,
            block,
            notifications: &mut notifications,
            config: self.natives.config().as_ref(),
        };
        match (method.handler)(&mut ctx, &call.args) {
            Ok(return_value) => ExecutionResult {
                success: true,
                gas_consumed: method.gas_cost,
                return_value,
                exception: None,
                notifications,
            },
            Err(NativeError::Fault(reason)) => ExecutionResult::fault(method.gas_cost, reason),
            Err(NativeError::Store(err)) => {
                ExecutionResult::fault(method.gas_cost, format!("storage error: {err}"))
            }
        }
    }

    fn verify_witness(
        &self,
        network_magic: u32,
        payload_hash: &UInt256,
        expected: &UInt160,
        witness: &Witness,
    ) -> bool {
        // Deployed-contract verification needs the full VM; the core only
        // honours standard signature contracts.
        if witness.verification.is_empty() {
            return false;
        }
        if UInt160::hash160_of(&witness.verification) != *expected {
            return false;
        }
        let Some(signatures) = extract_signatures(&witness.invocation) else {
            return false;
        };
        let message = signing_data(network_magic, payload_hash);
        match parse_verification_script(&witness.verification) {
            Some(VerificationContract::SingleSig(key)) => {
                signatures.len() == 1 && verify_signature(&message, &signatures[0], &key)
            }
            Some(VerificationContract::MultiSig { m, keys }) => {
                if signatures.len() != m {
                    return false;
                }
                // Signatures must appear in key order; each key is consumed
                // at most once.
                let mut key_index = 0;
                'signatures: for signature in &signatures {
                    while key_index < keys.len() {
                        let key = &keys[key_index];
                        key_index += 1;
                        if verify_signature(&message, signature, key) {
                            continue 'signatures;
                        }
                    }
                    return false;
                }
                true
            }
            None => false,
        }
    }
}

/// Builds the invocation script pushing `signatures` in order.
pub fn signature_invocation(signatures: &[[u8; 64]]) -> Vec<u8> {
    let mut script = Vec::with_capacity(signatures.len() * 66);
    for signature in signatures {
        script.push(OP_PUSHDATA1);
        script.push(SIGNATURE_LEN);
        script.extend_from_slice(signature);
    }
    script
}

/// Parses an invocation script that only pushes 64-byte signatures.
pub fn extract_signatures(invocation: &[u8]) -> Option<Vec<[u8; 64]>> {
    let mut signatures = Vec::new();
    let mut rest = invocation;
    while !rest.is_empty() {
        if rest.len() < 66 || rest[0] != OP_PUSHDATA1 || rest[1] != SIGNATURE_LEN {
            return None;
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&rest[2..66]);
        signatures.push(signature);
        rest = &rest[66..];
    }
    if signatures.is_empty() {
        None
    } else {
        Some(signatures)
    }
}

/// A parsed native invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCall {
    pub contract_id: i32,
    pub method: String,
    pub args: Vec<u8>,
}

fn call_native_id() -> [u8; 4] {
    let digest = sha256(CALL_NATIVE.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Builds the canonical native-call script:
/// `SYSCALL <CallNative> || contract_id:i32 || method:var_string || args:var_bytes`.
pub fn native_call_script(contract_id: i32, method: &str, args: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(10 + method.len() + args.len());
    script.push(OP_SYSCALL);
    script.extend_from_slice(&call_native_id());
    script.extend_from_slice(&contract_id.to_le_bytes());
    write_var_string(method, &mut script);
    write_var_bytes(args, &mut script);
    script
}

fn parse_native_call(script: &[u8]) -> Result<NativeCall, String> {
    if script.len() < 5 || script[0] != OP_SYSCALL || script[1..5] != call_native_id() {
        return Err("unsupported script shape".into());
    }
    let rest = &script[5..];
    if rest.len() < 4 {
        return Err("truncated native call".into());
    }
    let contract_id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let rest = &rest[4..];
    let (method, rest) =
        read_var_string(rest, MAX_METHOD_NAME).map_err(|e| format!("bad method name: {e}"))?;
    let (args, rest) =
        read_var_bytes(rest, MAX_CALL_ARGS).map_err(|e| format!("bad call args: {e}"))?;
    if !rest.is_empty() {
        return Err("trailing bytes after native call".into());
    }
    Ok(NativeCall {
        contract_id,
        method,
        args,
    })
}

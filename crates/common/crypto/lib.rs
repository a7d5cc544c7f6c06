pub mod bls;
pub mod ecdsa;
pub mod hash;
pub mod merkle;

pub use ecdsa::{validate_public_key, verify_signature, KeyPair, PublicKeyBytes, SignatureBytes};
pub use hash::{hash160, hash256, ripemd160, sha256};
pub use merkle::MerkleTree;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secp256r1 public key encoding")]
    InvalidPublicKey,
    #[error("invalid secp256r1 private key")]
    InvalidPrivateKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("invalid BLS12-381 point encoding")]
    InvalidBlsPoint,
}

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;

use crate::CryptoError;

/// Compressed SEC1 secp256r1 public key.
pub type PublicKeyBytes = [u8; 33];

/// Fixed-size `(r, s)` signature, low-s normalized.
pub type SignatureBytes = [u8; 64];

/// A secp256r1 signing identity.
///
/// Signatures are produced with the RFC 6979 deterministic nonce, so every
/// validator signing the same block digest emits byte-identical commit
/// signatures. That determinism is load-bearing for consensus recovery.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_private_key(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        bytes
    }

    /// Signs `message` (hashed internally with SHA-256) and returns the
    /// low-s normalized 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signature: Signature = self.signing_key.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        signature.to_bytes().into()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verifies a 64-byte `(r, s)` signature against a compressed public key.
///
/// High-s signatures are rejected outright: accepting both halves of the
/// malleability pair would let peers re-broadcast mutated transaction
/// witnesses under fresh hashes.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    if signature.normalize_s().is_some() {
        return false;
    }
    verifying_key.verify(message, &signature).is_ok()
}

/// Strict parse used when admitting validator keys from config or wire data.
pub fn validate_public_key(bytes: &[u8]) -> Result<PublicKeyBytes, CryptoError> {
    if bytes.len() != 33 {
        return Err(CryptoError::InvalidPublicKey);
    }
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    let mut key = [0u8; 33];
    key.copy_from_slice(bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"block signing data");
        assert!(verify_signature(
            b"block signing data",
            &signature,
            &keypair.public_key()
        ));
    }

    #[test]
    fn signing_is_deterministic() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.sign(b"same input"), keypair.sign(b"same input"));
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"original");
        assert!(!verify_signature(
            b"tampered",
            &signature,
            &keypair.public_key()
        ));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = keypair.sign(b"message");
        assert!(!verify_signature(b"message", &signature, &other.public_key()));
    }

    #[test]
    fn verify_rejects_malformed_inputs() {
        let keypair = KeyPair::generate();
        assert!(!verify_signature(b"m", &[0u8; 63], &keypair.public_key()));
        assert!(!verify_signature(b"m", &keypair.sign(b"m"), &[0u8; 33]));
    }

    #[test]
    fn public_key_validation() {
        let keypair = KeyPair::generate();
        assert!(validate_public_key(&keypair.public_key()).is_ok());
        assert!(validate_public_key(&[0u8; 33]).is_err());
        assert!(validate_public_key(&[0u8; 32]).is_err());
    }
}

//! BLS12-381 helpers for the aggregate-commit path.
//!
//! Commit signatures are normally plain secp256r1; validator sets that opt
//! into aggregation exchange G1 public keys and G2 signatures instead and
//! verify the whole quorum with two pairings.

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};

use crate::CryptoError;

/// Sums G1 public keys into the aggregate verification key.
pub fn aggregate_g1(points: &[G1Projective]) -> G1Projective {
    points
        .iter()
        .fold(G1Projective::identity(), |acc, p| acc + p)
}

/// Sums G2 signatures into the aggregate signature.
pub fn aggregate_g2(points: &[G2Projective]) -> G2Projective {
    points
        .iter()
        .fold(G2Projective::identity(), |acc, p| acc + p)
}

/// Checks `e(agg_pubkey, message_point) == e(g1, agg_signature)`.
///
/// `message_point` is the block signing digest mapped into G2 by the caller;
/// the committee must agree on that mapping out of band.
pub fn verify_aggregate(
    aggregate_pubkey: &G1Projective,
    message_point: &G2Projective,
    aggregate_signature: &G2Projective,
) -> bool {
    let lhs = pairing(
        &G1Affine::from(aggregate_pubkey),
        &G2Affine::from(message_point),
    );
    let rhs = pairing(&G1Affine::generator(), &G2Affine::from(aggregate_signature));
    lhs == rhs
}

/// Signs a pre-mapped G2 message point with a scalar secret key.
pub fn sign_point(secret: &Scalar, message_point: &G2Projective) -> G2Projective {
    message_point * secret
}

/// Derives the G1 public key for a scalar secret key.
pub fn public_key(secret: &Scalar) -> G1Projective {
    G1Projective::generator() * secret
}

pub fn g1_from_compressed(bytes: &[u8; 48]) -> Result<G1Projective, CryptoError> {
    let point = G1Affine::from_compressed(bytes);
    if point.is_some().into() {
        // Unwrap is checked by the CtOption flag above.
        #[allow(clippy::unwrap_used)]
        Ok(G1Projective::from(point.unwrap()))
    } else {
        Err(CryptoError::InvalidBlsPoint)
    }
}

pub fn g2_from_compressed(bytes: &[u8; 96]) -> Result<G2Projective, CryptoError> {
    let point = G2Affine::from_compressed(bytes);
    if point.is_some().into() {
        #[allow(clippy::unwrap_used)]
        Ok(G2Projective::from(point.unwrap()))
    } else {
        Err(CryptoError::InvalidBlsPoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(n: u64) -> Scalar {
        Scalar::from(n)
    }

    // A stand-in for hashing a digest to G2.
    fn message_point(n: u64) -> G2Projective {
        G2Projective::generator() * scalar(n)
    }

    #[test]
    fn single_signature_verifies() {
        let secret = scalar(42);
        let msg = message_point(7);
        let signature = sign_point(&secret, &msg);
        assert!(verify_aggregate(&public_key(&secret), &msg, &signature));
    }

    #[test]
    fn aggregate_of_three_verifies() {
        let secrets = [scalar(11), scalar(22), scalar(33)];
        let msg = message_point(99);

        let pubkeys: Vec<_> = secrets.iter().map(public_key).collect();
        let signatures: Vec<_> = secrets.iter().map(|s| sign_point(s, &msg)).collect();

        assert!(verify_aggregate(
            &aggregate_g1(&pubkeys),
            &msg,
            &aggregate_g2(&signatures)
        ));
    }

    #[test]
    fn aggregate_rejects_missing_share() {
        let secrets = [scalar(11), scalar(22), scalar(33)];
        let msg = message_point(99);

        let pubkeys: Vec<_> = secrets.iter().map(public_key).collect();
        // Only two of the three shares signed.
        let signatures: Vec<_> = secrets[..2].iter().map(|s| sign_point(s, &msg)).collect();

        assert!(!verify_aggregate(
            &aggregate_g1(&pubkeys),
            &msg,
            &aggregate_g2(&signatures)
        ));
    }

    #[test]
    fn compressed_round_trip() {
        let point = public_key(&scalar(5));
        let compressed = G1Affine::from(point).to_compressed();
        let decoded = g1_from_compressed(&compressed).expect("valid point");
        assert_eq!(decoded, point);
    }

    #[test]
    fn compressed_rejects_junk() {
        assert!(g1_from_compressed(&[0xffu8; 48]).is_err());
    }
}

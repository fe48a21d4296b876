//! Schnorr digit attestations over secp256k1.
//!
//! Each attested digit releases `s = k + e·x` where `k` is a per-digit
//! nonce scalar committed at announcement time as `R = k·G`, and
//! `e = H(event_id/index/digit)` reduced mod the curve order. A verifier
//! checks `s·G == R + e·P`.
//!
//! Nonce scalars leak the private key if reused: given two releases under
//! the same `k`, `x = (s_a - s_b)/(e_a - e_b)`. Callers must consume each
//! nonce exactly once.

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, FieldBytes, NonZeroScalar, ProjectivePoint, Scalar, U256};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::sha256;

#[derive(Error, Debug)]
pub enum SchnorrError {
    #[error("invalid scalar encoding")]
    InvalidScalar,
    #[error("invalid curve point encoding")]
    InvalidPoint,
}

/// A nonce scalar held between announcement and attestation.
///
/// The bytes are zeroized on drop; the scalar form exists only transiently
/// inside [`attest_digit`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct NonceSecret([u8; 32]);

impl NonceSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_scalar(&self) -> Result<Scalar, SchnorrError> {
        parse_scalar(&self.0)
    }
}

/// Generate a fresh nonce scalar and its compressed public point.
pub fn generate_nonce() -> (NonceSecret, [u8; 33]) {
    let k = NonZeroScalar::random(&mut OsRng);
    let r = (ProjectivePoint::GENERATOR * *k.as_ref())
        .to_affine()
        .to_encoded_point(true);
    let mut point = [0u8; 33];
    point.copy_from_slice(r.as_bytes());
    (NonceSecret(k.to_bytes().into()), point)
}

/// The per-digit challenge scalar `e_i = H(event_id/i/digit_i) mod n`.
pub fn attestation_challenge(event_id: &str, index: usize, digit: u8) -> Scalar {
    let digest = sha256(format!("{}/{}/{}", event_id, index, digit).as_bytes());
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(digest))
}

/// Release `s = k + e·x` for one digit position.
pub fn attest_digit(
    nonce: &NonceSecret,
    challenge: &Scalar,
    secret: &Scalar,
) -> Result<[u8; 32], SchnorrError> {
    let k = nonce.to_scalar()?;
    let s = k + challenge * secret;
    Ok(s.to_bytes().into())
}

/// Check `s·G == R + e·P`.
pub fn verify_digit(
    s_bytes: &[u8; 32],
    r_point: &[u8],
    challenge: &Scalar,
    pubkey: &[u8],
) -> bool {
    let s = match parse_scalar(s_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let r = match parse_point(r_point) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let p = match parse_point(pubkey) {
        Ok(p) => p,
        Err(_) => return false,
    };
    ProjectivePoint::GENERATOR * s == r + p * *challenge
}

/// Parse a canonical 32-byte scalar.
pub fn parse_scalar(bytes: &[u8; 32]) -> Result<Scalar, SchnorrError> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(*bytes)))
        .ok_or(SchnorrError::InvalidScalar)
}

/// Parse a SEC1-encoded curve point.
pub fn parse_point(bytes: &[u8]) -> Result<ProjectivePoint, SchnorrError> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| SchnorrError::InvalidPoint)?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .map(ProjectivePoint::from)
        .ok_or(SchnorrError::InvalidPoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EcdsaKeypair;

    #[test]
    fn test_attest_and_verify_digit() {
        let oracle = EcdsaKeypair::generate();
        let (nonce, r_point) = generate_nonce();

        let e = attestation_challenge("BTCUSD-2026-01-01T00:00:00Z", 0, 6);
        let s = attest_digit(&nonce, &e, &oracle.secret_scalar()).unwrap();

        assert!(verify_digit(&s, &r_point, &e, &oracle.public_key_compressed()));

        // A different digit yields a different challenge and must not verify.
        let e_other = attestation_challenge("BTCUSD-2026-01-01T00:00:00Z", 0, 7);
        assert!(!verify_digit(&s, &r_point, &e_other, &oracle.public_key_compressed()));
    }

    #[test]
    fn test_nonce_reuse_recovers_private_key() {
        // Releasing two s-values under the same nonce leaks x.
        let oracle = EcdsaKeypair::generate();
        let x = oracle.secret_scalar();
        let (nonce, _) = generate_nonce();

        let e_a = attestation_challenge("EV", 0, 1);
        let e_b = attestation_challenge("EV", 0, 2);
        let s_a = attest_digit(&nonce, &e_a, &x).unwrap();
        let s_b = attest_digit(&nonce, &e_b, &x).unwrap();

        let s_a = parse_scalar(&s_a).unwrap();
        let s_b = parse_scalar(&s_b).unwrap();
        let inv = Option::<Scalar>::from((e_a - e_b).invert()).unwrap();
        let recovered = (s_a - s_b) * inv;
        assert_eq!(recovered, x);
    }

    #[test]
    fn test_challenge_domain_separation() {
        let a = attestation_challenge("EV", 0, 5);
        let b = attestation_challenge("EV", 1, 5);
        let c = attestation_challenge("EW", 0, 5);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}

//! Keypair types for the two signing schemes.
//!
//! The secp256k1 keypair backs the Lightning-rail ECDSA signatures and the
//! Schnorr digit attestations (same private scalar). The Ed25519 keypair
//! backs the stablecoin-rail signatures.

use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, Scalar};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid secp256k1 secret key")]
    InvalidSecp256k1,
    #[error("invalid ed25519 seed")]
    InvalidEd25519,
}

/// secp256k1 keypair for ECDSA signing and Schnorr attestations.
#[derive(Clone)]
pub struct EcdsaKeypair {
    signing_key: SigningKey,
}

impl EcdsaKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Load from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecp256k1)?;
        Ok(Self { signing_key })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Compressed SEC1 public key, 33 bytes.
    pub fn public_key_compressed(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_compressed())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// The private scalar, for Schnorr attestation arithmetic.
    pub fn secret_scalar(&self) -> Scalar {
        *self.signing_key.as_nonzero_scalar().as_ref()
    }

    /// The private scalar as a non-zero scalar.
    pub fn nonzero_scalar(&self) -> NonZeroScalar {
        *self.signing_key.as_nonzero_scalar()
    }
}

/// Ed25519 keypair for the stablecoin rail.
#[derive(Clone)]
pub struct Ed25519Keypair {
    signing_key: Ed25519SigningKey,
}

impl Ed25519Keypair {
    pub fn generate() -> Self {
        Self {
            signing_key: Ed25519SigningKey::generate(&mut OsRng),
        }
    }

    /// Load from a 32-byte seed.
    pub fn from_seed_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidEd25519)?;
        Ok(Self {
            signing_key: Ed25519SigningKey::from_bytes(&seed),
        })
    }

    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    pub(crate) fn signing_key(&self) -> &Ed25519SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> Ed25519VerifyingKey {
        self.signing_key.verifying_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdsa_roundtrip() {
        let kp = EcdsaKeypair::generate();
        let restored = EcdsaKeypair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.public_key_compressed(), restored.public_key_compressed());
        assert_eq!(kp.public_key_compressed().len(), 33);
    }

    #[test]
    fn test_ed25519_roundtrip() {
        let kp = Ed25519Keypair::generate();
        let restored = Ed25519Keypair::from_seed_bytes(&kp.seed_bytes()).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_invalid_key_bytes() {
        assert!(EcdsaKeypair::from_secret_bytes(&[0u8; 32]).is_err());
        assert!(Ed25519Keypair::from_seed_bytes(b"short").is_err());
    }
}

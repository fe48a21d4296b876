//! Mycelia Crypto
//!
//! Pure cryptographic primitives shared by the oracle services.
//! No dependency on any protocol-specific types.

pub mod keys;
pub mod schnorr;
pub mod sign;

pub use keys::{EcdsaKeypair, Ed25519Keypair, KeyError};
pub use schnorr::{
    attest_digit, attestation_challenge, generate_nonce, parse_point, parse_scalar,
    verify_digit, NonceSecret, SchnorrError,
};
pub use sign::{
    ecdsa_sign_digest, ecdsa_verify_digest, ed25519_sign_digest, ed25519_verify_digest,
};

use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

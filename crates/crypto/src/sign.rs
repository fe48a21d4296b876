//! Signing over a precomputed SHA-256 digest.
//!
//! Both schemes sign the 32-byte digest of the canonical message, not the
//! message itself, so that verifiers only ever need the digest.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, VerifyingKey};

use crate::keys::{EcdsaKeypair, Ed25519Keypair};

/// ECDSA-sign a 32-byte digest, returning the DER-encoded signature.
pub fn ecdsa_sign_digest(keypair: &EcdsaKeypair, digest: &[u8; 32]) -> Option<Vec<u8>> {
    let sig: Signature = keypair.signing_key().sign_prehash(digest).ok()?;
    Some(sig.to_der().as_bytes().to_vec())
}

/// Verify a DER-encoded ECDSA signature over a 32-byte digest.
pub fn ecdsa_verify_digest(pubkey_sec1: &[u8], digest: &[u8; 32], der: &[u8]) -> bool {
    let verifying_key = match VerifyingKey::from_sec1_bytes(pubkey_sec1) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let sig = match Signature::from_der(der) {
        Ok(s) => s,
        Err(_) => return false,
    };
    verifying_key.verify_prehash(digest, &sig).is_ok()
}

/// Ed25519-sign a 32-byte digest, returning the raw 64-byte signature.
pub fn ed25519_sign_digest(keypair: &Ed25519Keypair, digest: &[u8; 32]) -> [u8; 64] {
    keypair.signing_key().sign(digest).to_bytes()
}

/// Verify a raw 64-byte Ed25519 signature over a 32-byte digest.
pub fn ed25519_verify_digest(pubkey: &[u8; 32], digest: &[u8; 32], signature: &[u8; 64]) -> bool {
    let verifying_key = match ed25519_dalek::VerifyingKey::from_bytes(pubkey) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let sig = Ed25519Signature::from_bytes(signature);
    verifying_key.verify(digest, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256;

    #[test]
    fn test_ecdsa_sign_and_verify() {
        let kp = EcdsaKeypair::generate();
        let digest = sha256(b"v1|BTCUSD|69003.00|USD|2|2026-01-01T00:00:00Z|1|kraken|median");

        let der = ecdsa_sign_digest(&kp, &digest).unwrap();
        assert!(ecdsa_verify_digest(&kp.public_key_compressed(), &digest, &der));

        let other = sha256(b"tampered");
        assert!(!ecdsa_verify_digest(&kp.public_key_compressed(), &other, &der));
    }

    #[test]
    fn test_ecdsa_tampered_signature_fails() {
        let kp = EcdsaKeypair::generate();
        let digest = sha256(b"message");
        let mut der = ecdsa_sign_digest(&kp, &digest).unwrap();
        let last = der.len() - 1;
        der[last] ^= 0x01;
        assert!(!ecdsa_verify_digest(&kp.public_key_compressed(), &digest, &der));
    }

    #[test]
    fn test_ed25519_sign_and_verify() {
        let kp = Ed25519Keypair::generate();
        let digest = sha256(b"message");

        let sig = ed25519_sign_digest(&kp, &digest);
        assert!(ed25519_verify_digest(&kp.public_key_bytes(), &digest, &sig));

        let mut bad = sig;
        bad[0] ^= 0x01;
        assert!(!ed25519_verify_digest(&kp.public_key_bytes(), &digest, &bad));
    }

    #[test]
    fn test_ed25519_wrong_key_fails() {
        let kp1 = Ed25519Keypair::generate();
        let kp2 = Ed25519Keypair::generate();
        let digest = sha256(b"message");
        let sig = ed25519_sign_digest(&kp1, &digest);
        assert!(!ed25519_verify_digest(&kp2.public_key_bytes(), &digest, &sig));
    }
}

//! Mycelia Signer
//!
//! Canonicalizes assertions and signs them under the rail-appropriate
//! scheme. Both schemes sign `SHA256(UTF-8(canonical))`: ECDSA emits a
//! DER signature with the compressed secp256k1 public key, Ed25519 the
//! raw 64-byte signature with the 32-byte public key. The digit-decomposed
//! Schnorr attestations for scheduled events live in [`dlc`].

pub mod dlc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mycelia_aggregator::Assertion;
use mycelia_crypto::{
    ecdsa_sign_digest, ecdsa_verify_digest, ed25519_sign_digest, ed25519_verify_digest, sha256,
    EcdsaKeypair, Ed25519Keypair,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing primitive failed")]
    Primitive,
    #[error("malformed signature encoding: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Ecdsa,
    Ed25519,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecdsa => "ecdsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

/// The paid response payload: canonical message plus signature bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAssertion {
    pub domain: String,
    pub canonical: String,
    pub signature: String,
    pub pubkey: String,
    pub signing_scheme: Scheme,
}

/// Holds both long-lived signing keys, loaded once at boot.
pub struct AttestationSigner {
    ecdsa: EcdsaKeypair,
    ed25519: Ed25519Keypair,
}

impl AttestationSigner {
    pub fn new(ecdsa: EcdsaKeypair, ed25519: Ed25519Keypair) -> Self {
        Self { ecdsa, ed25519 }
    }

    pub fn ecdsa(&self) -> &EcdsaKeypair {
        &self.ecdsa
    }

    pub fn ecdsa_pubkey_hex(&self) -> String {
        self.ecdsa.public_key_hex()
    }

    pub fn ed25519_pubkey_hex(&self) -> String {
        self.ed25519.public_key_hex()
    }

    /// Sign an assertion's canonical form.
    pub fn sign(&self, assertion: &Assertion, scheme: Scheme) -> Result<SignedAssertion, SignerError> {
        self.sign_canonical(&assertion.domain, assertion.canonical(), scheme)
    }

    /// Sign an already-canonical message, e.g. when re-wrapping a backend
    /// response for the stablecoin rail.
    pub fn sign_canonical(
        &self,
        domain: &str,
        canonical: String,
        scheme: Scheme,
    ) -> Result<SignedAssertion, SignerError> {
        let digest = sha256(canonical.as_bytes());
        let (signature, pubkey) = match scheme {
            Scheme::Ecdsa => {
                let der = ecdsa_sign_digest(&self.ecdsa, &digest).ok_or(SignerError::Primitive)?;
                (BASE64.encode(der), self.ecdsa_pubkey_hex())
            }
            Scheme::Ed25519 => {
                let sig = ed25519_sign_digest(&self.ed25519, &digest);
                (BASE64.encode(sig), self.ed25519_pubkey_hex())
            }
        };
        Ok(SignedAssertion {
            domain: domain.to_string(),
            canonical,
            signature,
            pubkey,
            signing_scheme: scheme,
        })
    }
}

/// Verify a signed assertion under its embedded public key.
pub fn verify(signed: &SignedAssertion) -> Result<bool, SignerError> {
    let digest = sha256(signed.canonical.as_bytes());
    let signature = BASE64
        .decode(&signed.signature)
        .map_err(|e| SignerError::Encoding(e.to_string()))?;
    let pubkey = hex::decode(&signed.pubkey).map_err(|e| SignerError::Encoding(e.to_string()))?;
    Ok(match signed.signing_scheme {
        Scheme::Ecdsa => ecdsa_verify_digest(&pubkey, &digest, &signature),
        Scheme::Ed25519 => {
            let pubkey: [u8; 32] = pubkey
                .as_slice()
                .try_into()
                .map_err(|_| SignerError::Encoding("bad ed25519 key length".to_string()))?;
            let signature: [u8; 64] = signature
                .as_slice()
                .try_into()
                .map_err(|_| SignerError::Encoding("bad ed25519 signature length".to_string()))?;
            ed25519_verify_digest(&pubkey, &digest, &signature)
        }
    })
}

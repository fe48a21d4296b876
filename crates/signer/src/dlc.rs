//! Digit-decomposed Schnorr attestations for scheduled events.
//!
//! The attested integer price is split into a fixed number of base-10
//! digits; each position releases one scalar bound to the nonce point
//! committed at announcement time. Nonce secrets are consumed by value
//! here so a caller cannot accidentally attest twice from the same
//! scalars.

use mycelia_crypto::{
    attest_digit, attestation_challenge, verify_digit, EcdsaKeypair, NonceSecret, SchnorrError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DlcError {
    #[error("price {0} does not fit in {1} digits")]
    PriceOutOfRange(u64, usize),
    #[error("expected {expected} nonces, got {got}")]
    NonceCount { expected: usize, got: usize },
    #[error(transparent)]
    Schnorr(#[from] SchnorrError),
}

/// Round a price to an integer and decompose it into exactly
/// `digit_count` base-10 digits, most significant first.
pub fn price_digits(price: f64, digit_count: usize) -> Result<(u64, Vec<u8>), DlcError> {
    let rounded = price.round().max(0.0) as u64;
    let rendered = format!("{rounded:0digit_count$}");
    if rendered.len() != digit_count {
        return Err(DlcError::PriceOutOfRange(rounded, digit_count));
    }
    let digits = rendered.bytes().map(|b| b - b'0').collect();
    Ok((rounded, digits))
}

/// Release one scalar per digit position: `s_i = k_i + e_i·x`.
///
/// Consumes the nonce secrets; their backing bytes are zeroized on drop.
pub fn attest_digits(
    event_id: &str,
    digits: &[u8],
    nonces: Vec<NonceSecret>,
    oracle: &EcdsaKeypair,
) -> Result<Vec<[u8; 32]>, DlcError> {
    if nonces.len() != digits.len() {
        return Err(DlcError::NonceCount {
            expected: digits.len(),
            got: nonces.len(),
        });
    }
    let x = oracle.secret_scalar();
    digits
        .iter()
        .zip(nonces)
        .enumerate()
        .map(|(index, (&digit, nonce))| {
            let e = attestation_challenge(event_id, index, digit);
            attest_digit(&nonce, &e, &x).map_err(DlcError::from)
        })
        .collect()
}

/// Verify every digit release against the announced nonce points.
pub fn verify_attestation(
    event_id: &str,
    digits: &[u8],
    s_values: &[[u8; 32]],
    r_points: &[Vec<u8>],
    oracle_pubkey: &[u8],
) -> bool {
    if digits.len() != s_values.len() || digits.len() != r_points.len() {
        return false;
    }
    digits.iter().enumerate().all(|(index, &digit)| {
        let e = attestation_challenge(event_id, index, digit);
        verify_digit(&s_values[index], &r_points[index], &e, oracle_pubkey)
    })
}

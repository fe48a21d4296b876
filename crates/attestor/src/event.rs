//! Event records: announcements and attestations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MATURITY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Deterministic event identifier: `<PAIR>-<maturity>`.
pub fn event_id(pair: &str, maturity: DateTime<Utc>) -> String {
    format!("{}-{}", pair, maturity.format(MATURITY_FORMAT))
}

/// Truncate to the containing hour boundary.
pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).expect("in-range unix timestamp")
}

/// Published at announcement time: one nonce point per digit position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub event_id: String,
    pub pair: String,
    pub maturity: DateTime<Utc>,
    pub oracle_pubkey: String,
    pub digit_count: usize,
    /// Compressed SEC1 points, hex, one per digit position.
    pub r_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Published at maturity: the digit releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub event_id: String,
    pub pair: String,
    pub maturity: DateTime<Utc>,
    pub oracle_pubkey: String,
    pub price: u64,
    pub price_digits: Vec<u8>,
    /// Released scalars, hex, one per digit position.
    pub s_values: Vec<String>,
    pub attested_at: DateTime<Utc>,
}

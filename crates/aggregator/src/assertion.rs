//! The signable assertion and its canonical wire form.
//!
//! The canonical string is the sole signing input, so its construction
//! must be byte-deterministic: the value carries exactly `decimals`
//! fractional digits, the timestamp is second-resolution UTC with a
//! trailing `Z`, and sources are lowercased, sorted, and comma-joined.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Median,
    Vwap,
    Cross,
    Hybrid,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Vwap => "vwap",
            Self::Cross => "cross",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "median" => Some(Self::Median),
            "vwap" => Some(Self::Vwap),
            "cross" => Some(Self::Cross),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("expected 9 fields, got {0}")]
    FieldCount(usize),
    #[error("unsupported version {0:?}")]
    Version(String),
    #[error("bad field {0}: {1:?}")]
    Field(&'static str, String),
}

/// A single signed statement of one metric at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub domain: String,
    pub value: f64,
    pub currency: String,
    pub decimals: u32,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    pub sources: Vec<String>,
    pub method: Method,
}

impl Assertion {
    /// Build an assertion, normalizing sources and truncating the
    /// timestamp to second resolution.
    pub fn new(
        domain: &str,
        value: f64,
        currency: &str,
        decimals: u32,
        timestamp: DateTime<Utc>,
        nonce: String,
        sources: Vec<String>,
        method: Method,
    ) -> Self {
        let mut sources: Vec<String> = sources.into_iter().map(|s| s.to_lowercase()).collect();
        sources.sort();
        sources.dedup();
        let timestamp = DateTime::from_timestamp(timestamp.timestamp(), 0)
            .expect("in-range unix timestamp");
        Self {
            domain: domain.to_string(),
            value,
            currency: currency.to_string(),
            decimals,
            timestamp,
            nonce,
            sources,
            method,
        }
    }

    /// The value rendered with exactly `decimals` fractional digits.
    pub fn formatted_value(&self) -> String {
        format!("{:.*}", self.decimals as usize, self.value)
    }

    /// The canonical wire form:
    /// `v1|<domain>|<value>|<currency>|<decimals>|<ts>|<nonce>|<sources>|<method>`
    pub fn canonical(&self) -> String {
        format!(
            "v1|{}|{}|{}|{}|{}|{}|{}|{}",
            self.domain,
            self.formatted_value(),
            self.currency,
            self.decimals,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.nonce,
            self.sources.join(","),
            self.method.as_str(),
        )
    }

    /// Parse a canonical string back into its fields.
    pub fn parse_canonical(s: &str) -> Result<Self, CanonicalError> {
        let fields: Vec<&str> = s.split('|').collect();
        if fields.len() != 9 {
            return Err(CanonicalError::FieldCount(fields.len()));
        }
        if fields[0] != "v1" {
            return Err(CanonicalError::Version(fields[0].to_string()));
        }
        let value: f64 = fields[2]
            .parse()
            .map_err(|_| CanonicalError::Field("value", fields[2].to_string()))?;
        let decimals: u32 = fields[4]
            .parse()
            .map_err(|_| CanonicalError::Field("decimals", fields[4].to_string()))?;
        let timestamp = NaiveDateTime::parse_from_str(fields[5], TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|_| CanonicalError::Field("timestamp", fields[5].to_string()))?;
        let method = Method::parse(fields[8])
            .ok_or_else(|| CanonicalError::Field("method", fields[8].to_string()))?;
        let sources = fields[7]
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Ok(Self {
            domain: fields[1].to_string(),
            value,
            currency: fields[3].to_string(),
            decimals,
            timestamp,
            nonce: fields[6].to_string(),
            sources,
            method,
        })
    }
}

/// Monotonic nonce sequence, seeded from the boot clock so values stay
/// unique across restarts within a signing-key lifetime.
pub struct NonceSeq {
    counter: AtomicU64,
}

impl Default for NonceSeq {
    fn default() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            counter: AtomicU64::new(seed),
        }
    }
}

impl NonceSeq {
    pub fn next(&self) -> String {
        self.counter.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Assertion {
        Assertion::new(
            "BTCUSD",
            69003.0,
            "USD",
            2,
            DateTime::from_timestamp(1_754_049_600, 0).unwrap(),
            "890123".to_string(),
            vec!["kraken".into(), "Coinbase".into(), "bitstamp".into()],
            Method::Median,
        )
    }

    #[test]
    fn test_canonical_layout() {
        assert_eq!(
            fixture().canonical(),
            "v1|BTCUSD|69003.00|USD|2|2025-08-01T12:00:00Z|890123|bitstamp,coinbase,kraken|median"
        );
    }

    #[test]
    fn test_canonical_roundtrip() {
        let a = fixture();
        let parsed = Assertion::parse_canonical(&a.canonical()).unwrap();
        assert_eq!(parsed, a);
        assert_eq!(parsed.canonical(), a.canonical());
    }

    #[test]
    fn test_source_order_does_not_matter() {
        let a = Assertion::new(
            "EURUSD",
            1.1,
            "USD",
            5,
            Utc::now(),
            "1".into(),
            vec!["ecb".into(), "cnb".into(), "rba".into()],
            Method::Median,
        );
        let b = Assertion::new(
            "EURUSD",
            1.1,
            "USD",
            5,
            a.timestamp,
            "1".into(),
            vec!["RBA".into(), "ecb".into(), "CNB".into()],
            Method::Median,
        );
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_value_padded_to_decimals() {
        let a = Assertion::new(
            "EURUSD",
            1.1,
            "USD",
            5,
            Utc::now(),
            "1".into(),
            vec!["ecb".into()],
            Method::Median,
        );
        assert_eq!(a.formatted_value(), "1.10000");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Assertion::parse_canonical("v1|too|short").is_err());
        assert!(Assertion::parse_canonical(
            "v2|BTCUSD|1.00|USD|2|2025-08-01T12:00:00Z|1|kraken|median"
        )
        .is_err());
        assert!(Assertion::parse_canonical(
            "v1|BTCUSD|1.00|USD|2|2025-08-01T12:00:00Z|1|kraken|average"
        )
        .is_err());
    }

    #[test]
    fn test_nonce_seq_is_strictly_increasing() {
        let seq = NonceSeq::default();
        let a: u64 = seq.next().parse().unwrap();
        let b: u64 = seq.next().parse().unwrap();
        assert_eq!(b, a + 1);
    }
}

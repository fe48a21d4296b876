//! Per-payer enforcement tiers for the stablecoin rail.
//!
//! Settlement failures are recorded against the payer address. Any
//! failure opens a cooldown; enough failures inside the trailing window
//! block the payer outright. Blocked is terminal in v1; only operator
//! intervention clears it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allowed,
    Grace { retry_after_secs: u64 },
    Blocked,
}

/// Public probe shape for `/sho/enforcement/{address}`.
#[derive(Debug, Serialize)]
pub struct EnforcementStatus {
    pub state: &'static str,
    pub failures_in_window: usize,
    pub grace_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PayerRecord {
    failures: Vec<DateTime<Utc>>,
    blocked: bool,
}

pub struct EnforcementTable {
    cooldown: Duration,
    threshold: usize,
    window: Duration,
    records: Mutex<HashMap<String, PayerRecord>>,
}

impl EnforcementTable {
    pub fn new(cooldown: Duration, threshold: usize, window: Duration) -> Self {
        Self {
            cooldown,
            threshold,
            window,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::days(7))
    }

    fn cooldown_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }

    /// Admission decision for a payer, advancing the state machine.
    pub fn check(&self, payer: &str, now: DateTime<Utc>) -> Admission {
        let key = payer.to_lowercase();
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&key) else {
            return Admission::Allowed;
        };
        if record.blocked {
            return Admission::Blocked;
        }

        let window = self.window_chrono();
        record.failures.retain(|at| now - *at < window);

        if record.failures.len() >= self.threshold {
            warn!(payer = %key, failures = record.failures.len(), "payer blocked");
            record.blocked = true;
            return Admission::Blocked;
        }

        if let Some(last) = record.failures.last() {
            let grace_until = *last + self.cooldown_chrono();
            if grace_until > now {
                return Admission::Grace {
                    retry_after_secs: (grace_until - now).num_seconds().max(0) as u64,
                };
            }
        }
        Admission::Allowed
    }

    /// Record one settlement failure.
    pub fn record_failure(&self, payer: &str, now: DateTime<Utc>) {
        let key = payer.to_lowercase();
        let mut records = self.records.lock().unwrap();
        let record = records.entry(key.clone()).or_default();
        record.failures.push(now);
        info!(payer = %key, failures = record.failures.len(), "settlement failure recorded");
    }

    /// Read-only probe; does not advance state.
    pub fn status(&self, payer: &str, now: DateTime<Utc>) -> EnforcementStatus {
        let key = payer.to_lowercase();
        let records = self.records.lock().unwrap();
        let Some(record) = records.get(&key) else {
            return EnforcementStatus {
                state: "clean",
                failures_in_window: 0,
                grace_until: None,
            };
        };
        if record.blocked {
            return EnforcementStatus {
                state: "blocked",
                failures_in_window: record.failures.len(),
                grace_until: None,
            };
        }
        let window = self.window_chrono();
        let in_window = record
            .failures
            .iter()
            .filter(|at| now - **at < window)
            .count();
        let grace_until = record
            .failures
            .last()
            .map(|last| *last + self.cooldown_chrono())
            .filter(|until| *until > now);
        EnforcementStatus {
            state: if grace_until.is_some() { "grace" } else { "clean" },
            failures_in_window: in_window,
            grace_until,
        }
    }
}

//! Server-minted single-use nonces for the stablecoin rail.
//!
//! A nonce is persisted as `minted` before it leaves the process inside a
//! challenge. Redemption is a compare-and-set under the table lock:
//! concurrent attempts on the same nonce see exactly one success.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::RngCore;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NonceState {
    Minted,
    Used,
}

struct NonceEntry {
    minted_at: Instant,
    state: NonceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    Accepted,
    Replayed,
    Expired,
    Unknown,
}

impl NonceOutcome {
    /// Stable machine-readable cause string.
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Accepted => "ok",
            Self::Replayed => "nonce_used",
            Self::Expired => "nonce_expired",
            Self::Unknown => "nonce_unknown",
        }
    }
}

pub struct NonceStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, NonceEntry>>,
}

impl NonceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a fresh nonce, pruning expired entries while the lock is held.
    pub fn mint(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);

        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.minted_at) <= self.ttl);
        entries.insert(
            nonce.clone(),
            NonceEntry {
                minted_at: now,
                state: NonceState::Minted,
            },
        );
        nonce
    }

    /// The `minted -> used` transition. Exactly one caller wins.
    pub fn consume(&self, nonce: &str) -> NonceOutcome {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(nonce) else {
            return NonceOutcome::Unknown;
        };
        if Instant::now().duration_since(entry.minted_at) > self.ttl {
            entries.remove(nonce);
            return NonceOutcome::Expired;
        }
        match entry.state {
            NonceState::Minted => {
                entry.state = NonceState::Used;
                NonceOutcome::Accepted
            }
            NonceState::Used => NonceOutcome::Replayed,
        }
    }
}

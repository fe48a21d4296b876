//! Per-source rate pacing.
//!
//! Upstream venues throttle aggressively; consecutive hits on the same
//! source are spaced by a minimum interval. Distinct sources never wait
//! on each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct SourcePacer {
    min_interval: Duration,
    next_slot: Mutex<HashMap<&'static str, Instant>>,
}

impl Default for SourcePacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl SourcePacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until this source's next slot, reserving the one after it.
    pub async fn pace(&self, source: &'static str) {
        let wait = {
            let mut slots = self.next_slot.lock().unwrap();
            let now = Instant::now();
            let slot = slots.get(source).copied().unwrap_or(now).max(now);
            slots.insert(source, slot + self.min_interval);
            slot - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_source_is_spaced() {
        let pacer = SourcePacer::new(Duration::from_millis(200));
        let start = Instant::now();
        pacer.pace("kraken").await;
        pacer.pace("kraken").await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_sources_do_not_wait() {
        let pacer = SourcePacer::new(Duration::from_secs(10));
        let start = Instant::now();
        pacer.pace("kraken").await;
        pacer.pace("bitstamp").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

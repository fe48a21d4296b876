//! Announcement and attestation scheduling.
//!
//! One cooperative task per oracle process. Every period it attests the
//! event whose maturity was just reached and tops up announcements across
//! the horizon. On boot it walks the store first: stale unattested events
//! inside the grace window are retried, older ones are marked missed and
//! stay terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mycelia_aggregator::{AggregateError, Engine};
use mycelia_crypto::EcdsaKeypair;
use mycelia_signer::dlc::{attest_digits, price_digits, DlcError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::event::{event_id, Announcement, Attestation};
use crate::store::{EventStore, StoreError};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Dlc(#[from] DlcError),
    #[error("nonce scalars already consumed for {0}")]
    NoncesConsumed(String),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub pair: String,
    pub digit_count: usize,
    /// Attestation cadence; maturities land on these boundaries.
    pub period: Duration,
    /// How far ahead announcements are kept published.
    pub horizon: Duration,
    /// How far past maturity a recovery attestation may still run.
    pub recovery_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pair: "BTCUSD".to_string(),
            digit_count: 5,
            period: Duration::from_secs(3600),
            horizon: Duration::from_secs(24 * 3600),
            recovery_grace: Duration::from_secs(3600),
        }
    }
}

pub struct Scheduler {
    store: Arc<EventStore>,
    engine: Arc<Engine>,
    oracle: EcdsaKeypair,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<EventStore>,
        engine: Arc<Engine>,
        oracle: EcdsaKeypair,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            oracle,
            config,
        }
    }

    fn period_secs(&self) -> i64 {
        self.config.period.as_secs().max(1) as i64
    }

    /// The boundary at or before `at`.
    fn align(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let period = self.period_secs();
        let secs = at.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(period), 0)
            .expect("in-range unix timestamp")
    }

    /// Ensure every boundary inside the horizon has a published
    /// announcement. Returns how many were created.
    pub fn announce_window(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let period = chrono::Duration::seconds(self.period_secs());
        let horizon = chrono::Duration::from_std(self.config.horizon)
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut created = 0;
        let mut maturity = self.align(now) + period;
        while maturity <= now + horizon {
            let eid = event_id(&self.config.pair, maturity);
            if self.store.announcement(&eid)?.is_none() {
                self.announce(maturity)?;
                created += 1;
            }
            maturity += period;
        }
        Ok(created)
    }

    /// Publish one event: fresh per-digit nonces persisted first, then
    /// the announcement carrying their public points.
    fn announce(&self, maturity: DateTime<Utc>) -> Result<Announcement, SchedulerError> {
        let eid = event_id(&self.config.pair, maturity);

        let mut secrets = Vec::with_capacity(self.config.digit_count);
        let mut r_points = Vec::with_capacity(self.config.digit_count);
        for _ in 0..self.config.digit_count {
            let (secret, point) = mycelia_crypto::generate_nonce();
            secrets.push(secret);
            r_points.push(hex::encode(point));
        }
        self.store.save_nonces(&eid, &secrets)?;

        let announcement = Announcement {
            event_id: eid.clone(),
            pair: self.config.pair.clone(),
            maturity,
            oracle_pubkey: self.oracle.public_key_hex(),
            digit_count: self.config.digit_count,
            r_points,
            created_at: Utc::now(),
        };
        self.store.save_announcement(&announcement)?;
        info!(event = %eid, "announced");
        Ok(announcement)
    }

    /// Attest one announced event: price via the aggregation engine, one
    /// scalar release per digit, nonces consumed exactly once.
    pub async fn attest_event(
        &self,
        announcement: &Announcement,
    ) -> Result<Attestation, SchedulerError> {
        let eid = &announcement.event_id;
        let assertion = self.engine.evaluate().await?;
        let (price, digits) = price_digits(assertion.value, announcement.digit_count)?;

        let nonces = self
            .store
            .take_nonces(eid)?
            .ok_or_else(|| SchedulerError::NoncesConsumed(eid.clone()))?;
        let s_values = attest_digits(eid, &digits, nonces, &self.oracle)?;

        let attestation = Attestation {
            event_id: eid.clone(),
            pair: announcement.pair.clone(),
            maturity: announcement.maturity,
            oracle_pubkey: self.oracle.public_key_hex(),
            price,
            price_digits: digits,
            s_values: s_values.iter().map(hex::encode).collect(),
            attested_at: Utc::now(),
        };
        self.store.save_attestation(&attestation)?;
        info!(event = %eid, price, "attested");
        Ok(attestation)
    }

    /// Attest the event for the boundary containing `now`, if it is still
    /// pending.
    pub async fn attest_due(&self, now: DateTime<Utc>) -> Result<Option<Attestation>, SchedulerError> {
        let maturity = self.align(now);
        let eid = event_id(&self.config.pair, maturity);
        if self.store.attestation(&eid)?.is_some() || self.store.is_missed(&eid) {
            return Ok(None);
        }
        let announcement = match self.store.announcement(&eid)? {
            Some(announcement) => announcement,
            None => {
                warn!(event = %eid, "maturity reached without announcement");
                self.announce(maturity)?
            }
        };
        self.attest_event(&announcement).await.map(Some)
    }

    /// Boot-time walk: retry just-missed events inside the grace window,
    /// mark older ones terminal, and refill the announcement horizon.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let grace = chrono::Duration::from_std(self.config.recovery_grace)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        for announcement in self.store.list_announcements()? {
            let eid = &announcement.event_id;
            if announcement.maturity > now
                || self.store.attestation(eid)?.is_some()
                || self.store.is_missed(eid)
            {
                continue;
            }
            if now - announcement.maturity <= grace {
                match self.attest_event(&announcement).await {
                    Ok(_) => info!(event = %eid, "recovered attestation"),
                    Err(SchedulerError::NoncesConsumed(_)) => {
                        warn!(event = %eid, "nonces gone; marking missed");
                        self.store.mark_missed(eid)?;
                    }
                    Err(e) => warn!(event = %eid, error = %e, "recovery attempt failed"),
                }
            } else {
                warn!(event = %eid, "past grace window; marking missed");
                self.store.mark_missed(eid)?;
            }
        }
        self.announce_window(now)?;
        Ok(())
    }

    /// The cooperative scheduler loop.
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = self.recover(Utc::now()).await {
            error!(error = %e, "event recovery failed");
        }

        loop {
            let now = Utc::now();
            let next = self.align(now) + chrono::Duration::seconds(self.period_secs());
            // Small buffer past the boundary so upstream ticker clocks agree.
            let wait = (next - now).num_seconds().max(0) as u64 + 5;
            info!(wait_secs = wait, "sleeping until next attestation boundary");
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let now = Utc::now();
            match self.attest_due(now).await {
                Ok(Some(attestation)) => {
                    info!(event = %attestation.event_id, "scheduled attestation complete")
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "scheduled attestation failed"),
            }
            if let Err(e) = self.announce_window(now) {
                error!(error = %e, "announcement top-up failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use mycelia_aggregator::{EngineKind, NonceSeq};
    use mycelia_feeds::{FetchContext, FetchResult, Fetcher, Sample};
    use mycelia_signer::dlc::verify_attestation;

    struct Fixed(f64);

    impl Fetcher for Fixed {
        fn source_id(&self) -> &'static str {
            "stub"
        }
        fn fetch<'a>(&'a self, _ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
            async move { Ok(Sample::spot("stub", self.0)) }.boxed()
        }
    }

    fn scheduler(dir: &std::path::Path, price: f64) -> Scheduler {
        let ctx = FetchContext::new(
            reqwest::Client::new(),
            Duration::from_secs(5),
            Duration::from_secs(86400),
        );
        let engine = Arc::new(Engine::new(
            "BTCUSD",
            "USD",
            2,
            EngineKind::Median {
                sources: vec![Box::new(Fixed(price))],
                min_quorum: 1,
            },
            ctx,
            Arc::new(NonceSeq::default()),
        ));
        Scheduler::new(
            Arc::new(EventStore::open(dir).unwrap()),
            engine,
            EcdsaKeypair::generate(),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_announce_window_fills_horizon() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), 68867.0);
        let now = Utc::now();

        let created = scheduler.announce_window(now).unwrap();
        assert_eq!(created, 24);

        // Idempotent on a second pass.
        assert_eq!(scheduler.announce_window(now).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attest_due_produces_verifiable_event() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), 68867.0);
        let now = Utc::now();

        let attestation = scheduler.attest_due(now).await.unwrap().unwrap();
        assert_eq!(attestation.price, 68867);
        assert_eq!(attestation.price_digits, vec![6, 8, 8, 6, 7]);

        let announcement = scheduler
            .store
            .announcement(&attestation.event_id)
            .unwrap()
            .unwrap();
        let s_values: Vec<[u8; 32]> = attestation
            .s_values
            .iter()
            .map(|s| hex::decode(s).unwrap().try_into().unwrap())
            .collect();
        let r_points: Vec<Vec<u8>> = announcement
            .r_points
            .iter()
            .map(|r| hex::decode(r).unwrap())
            .collect();
        assert!(verify_attestation(
            &attestation.event_id,
            &attestation.price_digits,
            &s_values,
            &r_points,
            &hex::decode(&announcement.oracle_pubkey).unwrap(),
        ));

        // The hour is settled; a second tick has nothing to do.
        assert!(scheduler.attest_due(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_attestation_of_same_event_refused() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), 68867.0);
        let announcement = scheduler.announce(scheduler.align(Utc::now())).unwrap();

        scheduler.attest_event(&announcement).await.unwrap();
        assert!(matches!(
            scheduler.attest_event(&announcement).await,
            Err(SchedulerError::NoncesConsumed(_))
        ));
    }

    #[tokio::test]
    async fn test_recover_marks_stale_events_missed() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path(), 68867.0);
        let stale_maturity = scheduler.align(Utc::now()) - chrono::Duration::hours(6);

        let announcement = scheduler.announce(stale_maturity).unwrap();
        scheduler.recover(Utc::now()).await.unwrap();

        assert!(scheduler.store.is_missed(&announcement.event_id));
        let (_, attested, missed) = scheduler.store.counts().unwrap();
        assert_eq!(attested, 0);
        assert_eq!(missed, 1);
    }
}

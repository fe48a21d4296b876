//! Mycelia Feeds
//!
//! Per-source upstream adapters. Every source implements the same
//! contract: one fetch attempt against one endpoint, returning either a
//! [`Sample`] or a typed [`FetchError`]. Fetchers never retry; quorum and
//! fallback policy belong to the aggregation layer, where it is visible.

pub mod catalog;
pub mod official;
pub mod pace;
pub mod spot;
pub mod trades;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::pace::SourcePacer;

/// One observation from one upstream source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub source_id: String,
    pub value: f64,
    /// Present iff the venue reports traded quantity.
    pub volume: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// A spot observation captured now.
    pub fn spot(source_id: &str, value: f64) -> Self {
        Self {
            source_id: source_id.to_string(),
            value,
            volume: None,
            captured_at: Utc::now(),
        }
    }
}

/// One executed trade from a trade-history endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub price: f64,
    pub volume: f64,
    pub executed_at: Option<DateTime<Utc>>,
}

/// The only recognized fetch failure kinds.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("parse: {0}")]
    Parse(String),
    #[error("stale release published {published}")]
    Stale { published: DateTime<Utc> },
}

pub type FetchResult = Result<Sample, FetchError>;

/// Shared per-request fetch environment.
#[derive(Clone)]
pub struct FetchContext {
    client: reqwest::Client,
    deadline: Duration,
    /// Acceptable age for official-rate releases.
    official_max_age: Duration,
    pacer: Arc<SourcePacer>,
}

impl FetchContext {
    pub fn new(client: reqwest::Client, deadline: Duration, official_max_age: Duration) -> Self {
        Self {
            client,
            deadline,
            official_max_age,
            pacer: Arc::new(SourcePacer::default()),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn official_max_age(&self) -> Duration {
        self.official_max_age
    }

    /// Paced GET returning the response body, with the context deadline
    /// applied to the whole exchange.
    pub async fn get_text(&self, source: &'static str, url: &str) -> Result<String, FetchError> {
        self.pacer.pace(source).await;
        let resp = self
            .client
            .get(url)
            .timeout(self.deadline)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

/// Uniform fetcher contract: one source, one attempt, one sample.
pub trait Fetcher: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult>;
}

/// Trade-history contract for VWAP domains: the returned trades are
/// already clipped to the lookback window where the venue timestamps them.
pub trait TradeFetcher: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn fetch<'a>(
        &'a self,
        ctx: &'a FetchContext,
        window: Duration,
    ) -> BoxFuture<'a, Result<Vec<Trade>, FetchError>>;
}

//! Per-asset aggregation engines.
//!
//! An engine owns its feed set and reduction rule. Every evaluation fans
//! out to all fetchers in parallel under the context deadline, discards
//! individual failures (they are logged, never surfaced), and reduces the
//! surviving samples. Coherence checking is the client's job by protocol
//! design, with one exception: the stablecoin-tier divergence gate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use mycelia_feeds::catalog::TieredSet;
use mycelia_feeds::{FetchContext, Fetcher, Sample, Trade, TradeFetcher};
use tracing::{debug, warn};

use crate::assertion::{Assertion, Method, NonceSeq};
use crate::stats::{median_lower, pooled_vwap};
use crate::AggregateError;

/// Stablecoin-tier coherence policy.
pub struct TieredPolicy {
    /// Relative divergence beyond which the whole secondary tier drops.
    pub divergence_threshold: f64,
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self {
            divergence_threshold: 0.005,
        }
    }
}

/// Pooled-VWAP policy. Quorum is a minimum aggregate trade count and a
/// minimum participating-source count.
pub struct VwapPolicy {
    pub window: Duration,
    pub min_trades: usize,
    pub min_sources: usize,
}

pub enum EngineKind {
    Median {
        sources: Vec<Box<dyn Fetcher>>,
        min_quorum: usize,
    },
    Tiered {
        set: TieredSet,
        reference: Vec<Box<dyn Fetcher>>,
        policy: TieredPolicy,
    },
    Vwap {
        feeds: Vec<Box<dyn TradeFetcher>>,
        policy: VwapPolicy,
    },
    Cross {
        base: Arc<Engine>,
        quote: Arc<Engine>,
    },
    Hybrid {
        direct: Vec<Box<dyn Fetcher>>,
        base: Arc<Engine>,
        quote: Arc<Engine>,
        synthetic_id: &'static str,
        min_quorum: usize,
    },
}

pub struct Engine {
    domain: String,
    currency: String,
    decimals: u32,
    kind: EngineKind,
    ctx: FetchContext,
    nonces: Arc<NonceSeq>,
}

impl Engine {
    pub fn new(
        domain: &str,
        currency: &str,
        decimals: u32,
        kind: EngineKind,
        ctx: FetchContext,
        nonces: Arc<NonceSeq>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            currency: currency.to_string(),
            decimals,
            kind,
            ctx,
            nonces,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Run one full evaluation: fan out, reduce, emit.
    ///
    /// Boxed because cross and hybrid domains evaluate their base engines
    /// recursively.
    pub fn evaluate(&self) -> BoxFuture<'_, Result<Assertion, AggregateError>> {
        async move {
            match &self.kind {
                EngineKind::Median { sources, min_quorum } => {
                    let samples = collect_samples(&self.ctx, sources).await;
                    self.reduce_median(samples, *min_quorum, Method::Median)
                }
                EngineKind::Tiered {
                    set,
                    reference,
                    policy,
                } => self.evaluate_tiered(set, reference, policy).await,
                EngineKind::Vwap { feeds, policy } => self.evaluate_vwap(feeds, policy).await,
                EngineKind::Cross { base, quote } => {
                    let (base, quote) = tokio::join!(base.evaluate(), quote.evaluate());
                    let (base, quote) = (base?, quote?);
                    if quote.value == 0.0 {
                        return Err(AggregateError::Degenerate(format!(
                            "zero quote rate from {}",
                            quote.domain
                        )));
                    }
                    let mut sources = base.sources.clone();
                    sources.extend(quote.sources.clone());
                    Ok(self.assertion(base.value / quote.value, sources, Method::Cross))
                }
                EngineKind::Hybrid {
                    direct,
                    base,
                    quote,
                    synthetic_id,
                    min_quorum,
                } => {
                    let (mut samples, derived) = tokio::join!(
                        collect_samples(&self.ctx, direct),
                        derive_cross(base, quote)
                    );
                    match derived {
                        Ok(value) => samples.push(Sample::spot(synthetic_id, value)),
                        Err(e) => debug!(domain = %self.domain, error = %e, "cross leg unavailable"),
                    }
                    self.reduce_median(samples, *min_quorum, Method::Hybrid)
                }
            }
        }
        .boxed()
    }

    async fn evaluate_tiered(
        &self,
        set: &TieredSet,
        reference: &[Box<dyn Fetcher>],
        policy: &TieredPolicy,
    ) -> Result<Assertion, AggregateError> {
        let (primary, native, rebased_raw, reference_samples) = tokio::join!(
            collect_samples(&self.ctx, &set.primary),
            collect_samples(&self.ctx, &set.secondary_native),
            collect_samples(&self.ctx, &set.secondary_rebased),
            collect_samples(&self.ctx, reference),
        );

        let rate = median_lower(
            &reference_samples
                .iter()
                .map(|s| s.value)
                .collect::<Vec<_>>(),
        );

        let mut secondary: Vec<Sample> = native;
        match rate {
            Some(rate) => {
                for mut sample in rebased_raw {
                    sample.value *= rate;
                    secondary.push(sample);
                }
            }
            None if !rebased_raw.is_empty() => {
                debug!(
                    domain = %self.domain,
                    dropped = rebased_raw.len(),
                    "no reference rate; stablecoin-quoted sources unusable"
                );
            }
            None => {}
        }
        // A secondary sample older than the fetch deadline cannot speak
        // for the current price; treat it as a failed fetch.
        let freshness = chrono::Duration::from_std(self.ctx.deadline())
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let now = Utc::now();
        secondary.retain(|s| now - s.captured_at <= freshness);

        let primary_values: Vec<f64> = primary.iter().map(|s| s.value).collect();
        let secondary_values: Vec<f64> = secondary.iter().map(|s| s.value).collect();

        let mut dropped = false;
        if primary_values.len() >= 2 && !secondary_values.is_empty() {
            let primary_median = median_lower(&primary_values).expect("non-empty");
            let secondary_median = median_lower(&secondary_values).expect("non-empty");
            let divergence = ((primary_median - secondary_median) / primary_median).abs();
            if divergence > policy.divergence_threshold {
                warn!(
                    domain = %self.domain,
                    divergence = format!("{:.4}", divergence),
                    "secondary tier diverges; dropping it"
                );
                dropped = true;
            }
        }

        let mut samples = primary;
        if !dropped {
            samples.extend(secondary);
        }
        let min = if dropped {
            set.min_primary_sources
        } else {
            set.min_sources
        };
        self.reduce_median(samples, min, Method::Median)
    }

    async fn evaluate_vwap(
        &self,
        feeds: &[Box<dyn TradeFetcher>],
        policy: &VwapPolicy,
    ) -> Result<Assertion, AggregateError> {
        let fetches = feeds.iter().map(|feed| {
            let ctx = self.ctx.clone();
            async move {
                let outcome =
                    tokio::time::timeout(ctx.deadline(), feed.fetch(&ctx, policy.window)).await;
                (feed.source_id(), outcome)
            }
        });

        let mut pool: Vec<Trade> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        for (source, outcome) in join_all(fetches).await {
            match outcome {
                Ok(Ok(trades)) if !trades.is_empty() => {
                    pool.extend(trades);
                    sources.push(source.to_string());
                }
                Ok(Ok(_)) => debug!(source, "no trades inside window"),
                Ok(Err(e)) => debug!(source, error = %e, "trade fetch failed"),
                Err(_) => debug!(source, "trade fetch deadline exceeded"),
            }
        }

        if sources.len() < policy.min_sources || pool.len() < policy.min_trades {
            return Err(AggregateError::InsufficientTrades {
                trades: pool.len(),
                sources: sources.len(),
            });
        }
        let value = pooled_vwap(&pool)
            .ok_or_else(|| AggregateError::Degenerate("zero pooled volume".to_string()))?;
        Ok(self.assertion(value, sources, Method::Vwap))
    }

    fn reduce_median(
        &self,
        samples: Vec<Sample>,
        min_quorum: usize,
        method: Method,
    ) -> Result<Assertion, AggregateError> {
        let need = min_quorum.max(1);
        if samples.len() < need {
            return Err(AggregateError::InsufficientQuorum {
                got: samples.len(),
                need,
            });
        }
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let value = median_lower(&values).expect("quorum is at least one");
        let sources = samples.into_iter().map(|s| s.source_id).collect();
        Ok(self.assertion(value, sources, method))
    }

    fn assertion(&self, value: f64, sources: Vec<String>, method: Method) -> Assertion {
        Assertion::new(
            &self.domain,
            value,
            &self.currency,
            self.decimals,
            Utc::now(),
            self.nonces.next(),
            sources,
            method,
        )
    }
}

/// Evaluate a base/quote pair down to the derived rate alone.
async fn derive_cross(base: &Arc<Engine>, quote: &Arc<Engine>) -> Result<f64, AggregateError> {
    let (base, quote) = tokio::join!(base.evaluate(), quote.evaluate());
    let (base, quote) = (base?, quote?);
    if quote.value == 0.0 {
        return Err(AggregateError::Degenerate(format!(
            "zero quote rate from {}",
            quote.domain
        )));
    }
    Ok(base.value / quote.value)
}

/// Fan out to every fetcher under the context deadline. Failures are
/// logged and counted only; the samples that made it decide quorum.
async fn collect_samples(ctx: &FetchContext, fetchers: &[Box<dyn Fetcher>]) -> Vec<Sample> {
    let fetches = fetchers.iter().map(|fetcher| {
        let ctx = ctx.clone();
        async move {
            match tokio::time::timeout(ctx.deadline(), fetcher.fetch(&ctx)).await {
                Ok(Ok(sample)) => Some(sample),
                Ok(Err(e)) => {
                    debug!(source = fetcher.source_id(), error = %e, "fetch failed");
                    None
                }
                Err(_) => {
                    debug!(source = fetcher.source_id(), "fetch deadline exceeded");
                    None
                }
            }
        }
    });
    join_all(fetches).await.into_iter().flatten().collect()
}

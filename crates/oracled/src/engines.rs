//! The engine registry: one aggregation engine per served domain, built
//! from the feed catalogs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mycelia_aggregator::{Engine, EngineKind, NonceSeq, TieredPolicy, VwapPolicy};
use mycelia_feeds::{catalog, FetchContext};

use crate::config::OracleConfig;

pub struct EngineRegistry {
    engines: HashMap<&'static str, Arc<Engine>>,
}

impl EngineRegistry {
    pub fn build(config: &OracleConfig, ctx: FetchContext) -> Self {
        let nonces = Arc::new(NonceSeq::default());
        let mut engines: HashMap<&'static str, Arc<Engine>> = HashMap::new();

        let tiered = |domain: &str, decimals: u32, set: catalog::TieredSet| {
            Engine::new(
                domain,
                "USD",
                decimals,
                EngineKind::Tiered {
                    set,
                    reference: catalog::usdt_reference(),
                    policy: TieredPolicy::default(),
                },
                ctx.clone(),
                nonces.clone(),
            )
        };

        let btcusd = Arc::new(tiered("BTCUSD", 2, catalog::btcusd()));
        engines.insert("btcusd", btcusd.clone());
        engines.insert("ethusd", Arc::new(tiered("ETHUSD", 2, catalog::ethusd())));
        let solusd = Arc::new(tiered("SOLUSD", 2, catalog::solusd()));
        engines.insert("solusd", solusd.clone());
        engines.insert("xauusd", Arc::new(tiered("XAUUSD", 2, catalog::xauusd())));

        let (eur_sources, eur_quorum) = catalog::eurusd();
        let eurusd = Arc::new(Engine::new(
            "EURUSD",
            "USD",
            5,
            EngineKind::Median {
                sources: eur_sources,
                min_quorum: eur_quorum,
            },
            ctx.clone(),
            nonces.clone(),
        ));
        engines.insert("eurusd", eurusd.clone());

        engines.insert(
            "btcusd_vwap",
            Arc::new(Engine::new(
                "BTCUSD",
                "USD",
                2,
                EngineKind::Vwap {
                    feeds: catalog::btcusd_trades(),
                    policy: VwapPolicy {
                        window: Duration::from_secs(config.vwap_window_secs),
                        min_trades: config.vwap_min_trades,
                        min_sources: config.vwap_min_sources,
                    },
                },
                ctx.clone(),
                nonces.clone(),
            )),
        );

        let (soleur_direct, soleur_quorum) = catalog::soleur_direct();
        engines.insert(
            "soleur",
            Arc::new(Engine::new(
                "SOLEUR",
                "EUR",
                2,
                EngineKind::Hybrid {
                    direct: soleur_direct,
                    base: solusd,
                    quote: eurusd.clone(),
                    synthetic_id: "crossrate",
                    min_quorum: soleur_quorum,
                },
                ctx.clone(),
                nonces.clone(),
            )),
        );

        engines.insert(
            "btceur",
            Arc::new(Engine::new(
                "BTCEUR",
                "EUR",
                2,
                EngineKind::Cross {
                    base: btcusd,
                    quote: eurusd,
                },
                ctx,
                nonces,
            )),
        );

        Self { engines }
    }

    /// Assemble a registry from prebuilt engines.
    pub fn from_engines(engines: HashMap<&'static str, Arc<Engine>>) -> Self {
        Self { engines }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Engine>> {
        self.engines.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.engines.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_serves_all_domains() {
        let config = OracleConfig::default();
        let ctx = FetchContext::new(
            reqwest::Client::new(),
            Duration::from_secs(config.fetch_deadline_secs),
            Duration::from_secs(config.official_rate_max_age_secs),
        );
        let registry = EngineRegistry::build(&config, ctx);

        for key in [
            "btcusd",
            "btcusd_vwap",
            "ethusd",
            "solusd",
            "eurusd",
            "xauusd",
            "soleur",
            "btceur",
        ] {
            assert!(registry.get(key).is_some(), "{key}");
        }
        assert_eq!(registry.keys().count(), 8);
    }
}

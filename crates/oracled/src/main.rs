//! mycelia-oracled: the oracle daemon.
//!
//! One Tokio process running three listeners: the loopback oracle
//! backend (aggregation + ECDSA signing + DLC records), the Lightning
//! payment gateway, and the stablecoin payment gateway. Background tasks
//! drive the attestation scheduler, the depeg monitor, and settlement
//! accounting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mycelia_attestor::{EventStore, Scheduler, SchedulerConfig};
use mycelia_feeds::{catalog, FetchContext};
use mycelia_gateway::depeg::DepegMonitor;
use mycelia_gateway::enforcement::EnforcementTable;
use mycelia_gateway::l402::L402State;
use mycelia_gateway::lnd::LndClient;
use mycelia_gateway::nonce::NonceStore;
use mycelia_gateway::routes::{RouteEntry, RouteTable};
use mycelia_gateway::settle::{Facilitator, SettlementWorker};
use mycelia_gateway::x402::{X402Config, X402State};
use mycelia_gateway::{l402, x402};
use mycelia_keystore::Keystore;
use mycelia_logging::LogLevel;
use mycelia_settings::Settings;
use mycelia_signer::AttestationSigner;
use tokio::net::TcpListener;
use tracing::{info, warn};

use mycelia_oracled::api;
use mycelia_oracled::config::{self, OracleConfig, Rail};
use mycelia_oracled::engines::EngineRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mycelia_logging::init(LogLevel::Info);

    let settings: Settings<OracleConfig> = Settings::load_or_default(&config_path())?;
    let config = settings.config.clone();
    info!(config = %settings.path().display(), "configuration loaded");

    let keystore = Keystore::open(&config.keystore_dir).context("opening keystore")?;
    let signer = Arc::new(AttestationSigner::new(
        keystore.ecdsa().clone(),
        keystore.ed25519().clone(),
    ));
    let root_key = *keystore.macaroon_root();
    info!(
        ecdsa_pubkey = %signer.ecdsa_pubkey_hex(),
        ed25519_pubkey = %signer.ed25519_pubkey_hex(),
        "signing keys loaded"
    );

    let client = reqwest::Client::builder()
        .user_agent("mycelia-oracle/0.1")
        .build()
        .context("building http client")?;
    let ctx = FetchContext::new(
        client.clone(),
        Duration::from_secs(config.fetch_deadline_secs),
        Duration::from_secs(config.official_rate_max_age_secs),
    );

    let registry = Arc::new(EngineRegistry::build(&config, ctx.clone()));

    // Scheduled attestations.
    let store = Arc::new(EventStore::open(&config.event_data_dir).context("opening event store")?);
    let attestation_engine = registry
        .get(&config.attestation_pair.to_lowercase())
        .with_context(|| format!("no engine for pair {}", config.attestation_pair))?;
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        attestation_engine,
        keystore.ecdsa().clone(),
        SchedulerConfig {
            pair: config.attestation_pair.clone(),
            digit_count: config.digit_count,
            period: Duration::from_secs(config.attestation_schedule_secs),
            horizon: Duration::from_secs(config.announcement_horizon_secs),
            recovery_grace: Duration::from_secs(config.recovery_grace_secs),
        },
    ));
    tokio::spawn(scheduler.run());

    // Stablecoin-rail shared state and background tasks.
    let enforcement = Arc::new(EnforcementTable::new(
        Duration::from_secs(config.grace_cooldown_secs),
        config.blocked_threshold,
        Duration::from_secs(config.blocked_window_secs),
    ));
    let facilitator = Arc::new(Facilitator::new(
        &config.evm_rpc_url,
        &config.stablecoin_contract,
        &config.stablecoin_recipient_address,
        client.clone(),
    ));
    let settlements = Arc::new(SettlementWorker::new(
        facilitator.clone(),
        enforcement.clone(),
        Duration::from_secs(config.settlement_timeout_secs),
    ));
    tokio::spawn(
        settlements
            .clone()
            .run(Duration::from_secs(config.settlement_interval_secs)),
    );
    let depeg = Arc::new(DepegMonitor::new(
        catalog::usdc_depeg_sources(),
        ctx.clone(),
        config.depeg_tolerance,
        2,
    ));
    tokio::spawn(
        depeg
            .clone()
            .run(Duration::from_secs(config.depeg_check_interval_secs)),
    );

    let lnd = match LndClient::from_credential_file(
        &config.payment_node_base_url,
        &config.payment_node_credential_path,
        client.clone(),
    ) {
        Ok(lnd) => lnd,
        Err(e) => {
            warn!(error = %e, "node credential unavailable; lightning challenges will fail");
            LndClient::new(&config.payment_node_base_url, String::new(), client.clone())
        }
    };

    let backend_default = format!("http://{}", config.backend_listen);
    let l402_state = Arc::new(L402State {
        routes: lightning_table(&config, &backend_default),
        lnd,
        root_key,
        location: "mycelia".to_string(),
        client: client.clone(),
    });
    let x402_state = Arc::new(X402State {
        routes: stablecoin_table(&config, &backend_default),
        nonces: NonceStore::new(Duration::from_secs(config.nonce_ttl_secs)),
        enforcement,
        depeg,
        facilitator,
        settlements,
        signer: signer.clone(),
        client: client.clone(),
        config: X402Config {
            network: "eip155:8453".to_string(),
            chain_name: "base".to_string(),
            asset_symbol: "USDC".to_string(),
            asset_contract: config.stablecoin_contract.clone(),
            asset_decimals: 6,
            recipient: config.stablecoin_recipient_address.clone(),
            resource_base: config.resource_base_url.clone(),
        },
    });

    let api_state = api::ApiState {
        registry,
        signer,
        store,
        attestation_pair: config.attestation_pair.clone(),
        digit_count: config.digit_count,
    };

    let backend_listener = TcpListener::bind(config.backend_listen)
        .await
        .context("binding backend listener")?;
    let lightning_listener = TcpListener::bind(config.lightning_listen)
        .await
        .context("binding lightning listener")?;
    let stablecoin_listener = TcpListener::bind(config.stablecoin_listen)
        .await
        .context("binding stablecoin listener")?;
    info!(
        backend = %config.backend_listen,
        lightning = %config.lightning_listen,
        stablecoin = %config.stablecoin_listen,
        "listeners bound"
    );

    let backend = async move {
        axum::serve(backend_listener, api::router(api_state))
            .await
            .map_err(anyhow::Error::from)
    };
    let lightning = async move {
        axum::serve(lightning_listener, l402::router(l402_state))
            .await
            .map_err(anyhow::Error::from)
    };
    let stablecoin = async move {
        axum::serve(stablecoin_listener, x402::router(x402_state))
            .await
            .map_err(anyhow::Error::from)
    };
    tokio::try_join!(backend, lightning, stablecoin)?;
    Ok(())
}

fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    std::env::var("MYCELIA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("oracled.json"))
}

fn lightning_table(config: &OracleConfig, default_backend: &str) -> RouteTable<u64> {
    let entry = |route: &config::RouteConfig| RouteEntry {
        backend: route
            .backend_url
            .clone()
            .unwrap_or_else(|| default_backend.to_string()),
        price: route.price.round().max(0.0) as u64,
    };
    let exact: HashMap<String, RouteEntry<u64>> = config
        .route_table
        .iter()
        .filter(|r| r.rail == Rail::Lightning)
        .map(|r| (r.path.clone(), entry(r)))
        .collect();
    let prefix = config
        .prefix_route_table
        .iter()
        .filter(|r| r.rail == Rail::Lightning)
        .map(|r| (r.path.clone(), entry(r)))
        .collect();
    RouteTable::new(exact, prefix, free_table(config, default_backend))
}

fn stablecoin_table(config: &OracleConfig, default_backend: &str) -> RouteTable<f64> {
    let entry = |route: &config::RouteConfig| RouteEntry {
        backend: route
            .backend_url
            .clone()
            .unwrap_or_else(|| default_backend.to_string()),
        price: route.price,
    };
    let exact: HashMap<String, RouteEntry<f64>> = config
        .route_table
        .iter()
        .filter(|r| r.rail == Rail::StablecoinEvm)
        .map(|r| (r.path.clone(), entry(r)))
        .collect();
    let prefix = config
        .prefix_route_table
        .iter()
        .filter(|r| r.rail == Rail::StablecoinEvm)
        .map(|r| (r.path.clone(), entry(r)))
        .collect();
    RouteTable::new(exact, prefix, free_table(config, default_backend))
}

fn free_table(config: &OracleConfig, default_backend: &str) -> HashMap<String, String> {
    config
        .free_route_table
        .iter()
        .map(|path| (path.clone(), default_backend.to_string()))
        .collect()
}

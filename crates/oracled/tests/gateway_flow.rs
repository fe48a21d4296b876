//! End-to-end gateway flows against an in-process oracle backend.
//!
//! The backend runs on a real loopback listener with a stub feed set so
//! no upstream venue is touched. The stablecoin flow additionally runs
//! against a stub chain RPC that reports every transfer as mined and
//! paid.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use mycelia_aggregator::{Engine, EngineKind, NonceSeq};
use mycelia_attestor::EventStore;
use mycelia_crypto::{sha256, EcdsaKeypair, Ed25519Keypair};
use mycelia_feeds::{FetchContext, FetchResult, Fetcher, Sample};
use mycelia_gateway::depeg::DepegMonitor;
use mycelia_gateway::enforcement::EnforcementTable;
use mycelia_gateway::l402::L402State;
use mycelia_gateway::lnd::LndClient;
use mycelia_gateway::macaroon::Macaroon;
use mycelia_gateway::nonce::NonceStore;
use mycelia_gateway::routes::{RouteEntry, RouteTable};
use mycelia_gateway::settle::{Facilitator, SettlementWorker, TRANSFER_EVENT_TOPIC};
use mycelia_gateway::x402::{X402Config, X402State};
use mycelia_gateway::{l402, x402};
use mycelia_oracled::api::{self, ApiState};
use mycelia_oracled::engines::EngineRegistry;
use mycelia_signer::{verify, AttestationSigner, Scheme, SignedAssertion};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::util::ServiceExt;

const ASSET: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

struct Fixed {
    id: &'static str,
    value: f64,
}

impl Fetcher for Fixed {
    fn source_id(&self) -> &'static str {
        self.id
    }
    fn fetch<'a>(&'a self, _ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move { Ok(Sample::spot(self.id, self.value)) }.boxed()
    }
}

fn fetch_ctx() -> FetchContext {
    FetchContext::new(
        reqwest::Client::new(),
        Duration::from_secs(2),
        Duration::from_secs(86400),
    )
}

fn stub_registry() -> EngineRegistry {
    let nonces = Arc::new(NonceSeq::default());
    let median = |domain: &str, decimals: u32, sources: Vec<Box<dyn Fetcher>>, min_quorum| {
        Engine::new(
            domain,
            "USD",
            decimals,
            EngineKind::Median { sources, min_quorum },
            fetch_ctx(),
            nonces.clone(),
        )
    };

    let btcusd = median(
        "BTCUSD",
        2,
        vec![
            Box::new(Fixed { id: "a", value: 69001.0 }),
            Box::new(Fixed { id: "b", value: 69010.0 }),
            Box::new(Fixed { id: "c", value: 69003.0 }),
        ],
        2,
    );
    let solusd = Arc::new(median(
        "SOLUSD",
        2,
        vec![Box::new(Fixed { id: "kraken", value: 170.0 })],
        1,
    ));
    let eurusd = Arc::new(median(
        "EURUSD",
        5,
        vec![Box::new(Fixed { id: "ecb", value: 1.0 })],
        1,
    ));
    let soleur = Engine::new(
        "SOLEUR",
        "EUR",
        2,
        EngineKind::Hybrid {
            direct: vec![
                Box::new(Fixed { id: "coinbase", value: 171.0 }),
                Box::new(Fixed { id: "bitstamp", value: 169.0 }),
            ],
            base: solusd,
            quote: eurusd,
            synthetic_id: "crossrate",
            min_quorum: 2,
        },
        fetch_ctx(),
        nonces.clone(),
    );

    let mut engines = HashMap::new();
    engines.insert("btcusd", Arc::new(btcusd));
    engines.insert("soleur", Arc::new(soleur));
    EngineRegistry::from_engines(engines)
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_backend(signer: Arc<AttestationSigner>, store_dir: &std::path::Path) -> String {
    let state = ApiState {
        registry: Arc::new(stub_registry()),
        signer,
        store: Arc::new(EventStore::open(store_dir).unwrap()),
        attestation_pair: "BTCUSD".to_string(),
        digit_count: 5,
    };
    let addr = spawn(api::router(state)).await;
    format!("http://{addr}")
}

/// Chain RPC stub: every receipt lookup reports a mined transfer of
/// 1000 base units to the configured recipient.
async fn spawn_rpc() -> String {
    async fn rpc() -> impl IntoResponse {
        Json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "status": "0x1",
                "logs": [{
                    "address": ASSET,
                    "topics": [
                        TRANSFER_EVENT_TOPIC,
                        "0x0000000000000000000000002222222222222222222222222222222222222222",
                        format!("0x000000000000000000000000{}", &RECIPIENT[2..]),
                    ],
                    "data": "0x3e8",
                }],
            },
        }))
    }
    let addr = spawn(Router::new().fallback(rpc)).await;
    format!("http://{addr}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_l402_paid_flow_returns_verifiable_assertion() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(AttestationSigner::new(
        EcdsaKeypair::generate(),
        Ed25519Keypair::generate(),
    ));
    let backend = spawn_backend(signer.clone(), dir.path()).await;

    let root_key = [5u8; 32];
    let mut exact = HashMap::new();
    exact.insert(
        "/oracle/btcusd".to_string(),
        RouteEntry {
            backend: backend.clone(),
            price: 10u64,
        },
    );
    let state = Arc::new(L402State {
        routes: RouteTable::new(exact, vec![], HashMap::new()),
        lnd: LndClient::new("http://127.0.0.1:1", String::new(), reqwest::Client::new()),
        root_key,
        location: "mycelia".to_string(),
        client: reqwest::Client::new(),
    });

    // A paid invoice: the preimage is known, the macaroon embeds its hash.
    let preimage = [9u8; 32];
    let macaroon = Macaroon::mint(&root_key, &sha256(&preimage), "mycelia");
    let token = format!("L402 {}:{}", macaroon.to_base64(), hex::encode(preimage));

    let response = l402::router(state)
        .oneshot(
            Request::builder()
                .uri("/oracle/btcusd")
                .header("authorization", token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let signed: SignedAssertion = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(signed.domain, "BTCUSD");
    assert_eq!(signed.signing_scheme, Scheme::Ecdsa);
    assert!(signed.canonical.contains("|69003.00|USD|2|"));
    assert!(signed.canonical.contains("|a,b,c|median"));
    assert!(verify(&signed).unwrap());
}

#[tokio::test]
async fn test_l402_hybrid_domain_served() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(AttestationSigner::new(
        EcdsaKeypair::generate(),
        Ed25519Keypair::generate(),
    ));
    let backend = spawn_backend(signer.clone(), dir.path()).await;

    let root_key = [6u8; 32];
    let mut exact = HashMap::new();
    exact.insert(
        "/oracle/soleur".to_string(),
        RouteEntry {
            backend,
            price: 10u64,
        },
    );
    let state = Arc::new(L402State {
        routes: RouteTable::new(exact, vec![], HashMap::new()),
        lnd: LndClient::new("http://127.0.0.1:1", String::new(), reqwest::Client::new()),
        root_key,
        location: "mycelia".to_string(),
        client: reqwest::Client::new(),
    });

    let preimage = [11u8; 32];
    let macaroon = Macaroon::mint(&root_key, &sha256(&preimage), "mycelia");
    let token = format!("L402 {}:{}", macaroon.to_base64(), hex::encode(preimage));

    let response = l402::router(state)
        .oneshot(
            Request::builder()
                .uri("/oracle/soleur")
                .header("authorization", token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Direct quotes 169/171 plus the derived 170 from SOLUSD/EURUSD:
    // the synthetic source participates and the median lands on it.
    let signed: SignedAssertion = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(signed.domain, "SOLEUR");
    assert!(signed.canonical.contains("|170.00|EUR|2|"));
    assert!(signed.canonical.contains("|bitstamp,coinbase,crossrate|hybrid"));
    assert!(verify(&signed).unwrap());
}

#[tokio::test]
async fn test_x402_paid_flow_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(AttestationSigner::new(
        EcdsaKeypair::generate(),
        Ed25519Keypair::generate(),
    ));
    let backend = spawn_backend(signer.clone(), dir.path()).await;
    let rpc = spawn_rpc().await;

    let mut exact = HashMap::new();
    exact.insert(
        "/oracle/btcusd".to_string(),
        RouteEntry {
            backend,
            price: 0.001f64,
        },
    );
    let enforcement = Arc::new(EnforcementTable::new(
        Duration::from_secs(600),
        10,
        Duration::from_secs(7 * 24 * 3600),
    ));
    let facilitator = Arc::new(Facilitator::new(&rpc, ASSET, RECIPIENT, reqwest::Client::new()));
    let state = Arc::new(X402State {
        routes: RouteTable::new(exact, vec![], HashMap::new()),
        nonces: NonceStore::new(Duration::from_secs(300)),
        enforcement: enforcement.clone(),
        depeg: Arc::new(DepegMonitor::new(vec![], fetch_ctx(), 0.02, 2)),
        facilitator: facilitator.clone(),
        settlements: Arc::new(SettlementWorker::new(
            facilitator,
            enforcement,
            Duration::from_secs(300),
        )),
        signer,
        client: reqwest::Client::new(),
        config: X402Config {
            network: "eip155:8453".to_string(),
            chain_name: "base".to_string(),
            asset_symbol: "USDC".to_string(),
            asset_contract: ASSET.to_string(),
            asset_decimals: 6,
            recipient: RECIPIENT.to_string(),
            resource_base: "https://oracle.example".to_string(),
        },
    });

    // 1. Challenge.
    let response = x402::router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/oracle/btcusd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let challenge = body_json(response).await;
    let nonce = challenge["x402"]["nonce"].as_str().unwrap().to_string();

    // 2. Pay and redeem.
    let header = BASE64.encode(
        json!({ "tx_hash": "0xfeed", "nonce": nonce, "from": "0x2222" }).to_string(),
    );
    let response = x402::router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/oracle/btcusd")
                .header("x-payment", header.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["signing_scheme"], "ed25519");
    assert_eq!(body["payment"]["protocol"], "x402");
    assert_eq!(body["payment"]["confirmed"], true);

    let signed: SignedAssertion = serde_json::from_value(json!({
        "domain": body["domain"],
        "canonical": body["canonical"],
        "signature": body["signature"],
        "pubkey": body["pubkey"],
        "signing_scheme": body["signing_scheme"],
    }))
    .unwrap();
    assert!(verify(&signed).unwrap());

    // 3. Replay the same token.
    let response = x402::router(state)
        .oneshot(
            Request::builder()
                .uri("/oracle/btcusd")
                .header("x-payment", header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "nonce_used");
}

//! Stablecoin-rail listener (x402).
//!
//! Admission gates run in order: depeg breaker, token parse, nonce
//! compare-and-set, payer enforcement, then on-chain verification with
//! optimistic acceptance of decodable pending transfers. The backend
//! canonical is re-signed under Ed25519 and delivered with a payment
//! object recording the optimistic state; settlement accounting runs
//! afterwards in the background.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use mycelia_signer::{AttestationSigner, Scheme};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::depeg::DepegMonitor;
use crate::enforcement::{Admission, EnforcementTable};
use crate::nonce::{NonceOutcome, NonceStore};
use crate::routes::{RouteMatch, RouteTable};
use crate::settle::{Facilitator, SettlementWorker};
use crate::fetch_backend;

#[derive(Debug, Clone)]
pub struct X402Config {
    /// CAIP-2 network id for the accepts descriptor, e.g. `eip155:8453`.
    pub network: String,
    /// Legacy chain name for the compatibility object, e.g. `base`.
    pub chain_name: String,
    pub asset_symbol: String,
    pub asset_contract: String,
    pub asset_decimals: u32,
    pub recipient: String,
    /// Public URL prefix used in the `resource` field.
    pub resource_base: String,
}

pub struct X402State {
    pub routes: RouteTable<f64>,
    pub nonces: NonceStore,
    pub enforcement: Arc<EnforcementTable>,
    pub depeg: Arc<DepegMonitor>,
    pub facilitator: Arc<Facilitator>,
    pub settlements: Arc<SettlementWorker>,
    pub signer: Arc<AttestationSigner>,
    pub client: reqwest::Client,
    pub config: X402Config,
}

pub fn router(state: Arc<X402State>) -> Router {
    Router::new()
        .route("/sho/info", get(info))
        .route("/sho/enforcement/:address", get(enforcement_probe))
        .fallback(handle)
        .with_state(state)
}

/// The presented payment token: base64(JSON), raw JSON accepted for
/// older clients.
#[derive(Debug, Deserialize)]
pub struct PaymentToken {
    pub tx_hash: String,
    pub nonce: String,
    #[serde(default)]
    pub from: Option<String>,
}

pub fn parse_payment_header(value: &str) -> Result<PaymentToken, String> {
    if let Ok(bytes) = BASE64.decode(value.trim()) {
        if let Ok(token) = serde_json::from_slice(&bytes) {
            return Ok(token);
        }
    }
    serde_json::from_str(value).map_err(|e| e.to_string())
}

/// Price in the asset's base units.
pub fn base_units(price: f64, decimals: u32) -> u128 {
    (price * 10f64.powi(decimals as i32)).round().max(0.0) as u128
}

fn accepts_entry(state: &X402State, path: &str, price: f64) -> Value {
    let config = &state.config;
    json!({
        "scheme": "exact",
        "network": config.network,
        "maxAmountRequired": base_units(price, config.asset_decimals).to_string(),
        "asset": config.asset_contract,
        "payTo": config.recipient,
        "resource": format!("{}{}", config.resource_base, path),
        "mimeType": "application/json",
        "description": "Signed price attestation",
        "maxTimeoutSeconds": state.nonces.ttl().as_secs(),
    })
}

/// The 402 challenge: standards-compliant body plus the base64
/// `Payment-Required` header. Never carries assertion fields.
fn challenge_response(state: &X402State, path: &str, price: f64) -> Response {
    let nonce = state.nonces.mint();
    let accepts = json!([accepts_entry(state, path, price)]);
    let header_value = BASE64.encode(
        json!({ "x402Version": 1, "accepts": accepts }).to_string(),
    );
    let config = &state.config;
    let body = json!({
        "x402Version": 1,
        "accepts": accepts,
        "error": "X-Payment header is required",
        "x402": {
            "version": "1",
            "chain": config.chain_name,
            "asset": config.asset_symbol,
            "contract": config.asset_contract,
            "recipient": config.recipient,
            "amount": format!("{price}"),
            "nonce": nonce,
            "expires_in": state.nonces.ttl().as_secs(),
        },
    });
    (
        StatusCode::PAYMENT_REQUIRED,
        [("Payment-Required", header_value)],
        Json(body),
    )
        .into_response()
}

async fn handle(
    State(state): State<Arc<X402State>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let entry = match state.routes.resolve(&path) {
        RouteMatch::Free(backend) => {
            return proxy(&state, backend, &path_and_query).await;
        }
        RouteMatch::Paid(entry) => entry,
        RouteMatch::NotFound => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" })))
                .into_response();
        }
    };

    let depeg = state.depeg.state();
    if !depeg.peg_ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "depeg_circuit_breaker",
                "message": "stablecoin payment suspended; parity outside tolerance",
                "stablecoin_rate": depeg.last_median,
                "threshold": state.depeg.tolerance(),
            })),
        )
            .into_response();
    }

    let Some(header) = headers.get("x-payment").and_then(|v| v.to_str().ok()) else {
        return challenge_response(&state, &path, entry.price);
    };

    let token = match parse_payment_header(header) {
        Ok(token) => token,
        Err(detail) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_payment_header", "detail": detail })),
            )
                .into_response();
        }
    };

    let outcome = state.nonces.consume(&token.nonce);
    if outcome != NonceOutcome::Accepted {
        debug!(nonce = %token.nonce, cause = outcome.cause(), "nonce rejected");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": outcome.cause() })),
        )
            .into_response();
    }

    let payer = token.from.as_deref().unwrap_or("unknown");
    match state.enforcement.check(payer, Utc::now()) {
        Admission::Allowed => {}
        Admission::Grace { retry_after_secs } => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": "payment_address_blocked",
                    "reason": "cooldown",
                    "retry_after_secs": retry_after_secs,
                })),
            )
                .into_response();
        }
        Admission::Blocked => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "payment_address_blocked", "reason": "blocked" })),
            )
                .into_response();
        }
    }

    let expected = base_units(entry.price, state.config.asset_decimals);
    let verification = match state
        .facilitator
        .verify_transfer(&token.tx_hash, expected)
        .await
    {
        Ok(verification) => verification,
        Err(e) => {
            warn!(tx = %token.tx_hash, error = %e, "settlement rpc unavailable");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "settlement_rpc_unavailable" })),
            )
                .into_response();
        }
    };
    if !verification.valid {
        state.enforcement.record_failure(payer, Utc::now());
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "payment_verification_failed",
                "detail": verification.cause,
            })),
        )
            .into_response();
    }

    let backend_body = match fetch_backend(&state.client, &entry.backend, &path_and_query).await
    {
        Ok((status, body)) if status.is_success() => body,
        Ok((status, _)) => {
            warn!(path = %path, %status, "backend returned failure");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "oracle_backend_error" })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(path = %path, error = %e, "backend unreachable");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "oracle_backend_error" })),
            )
                .into_response();
        }
    };

    let backend: Value = match serde_json::from_str(&backend_body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "oracle_backend_error" })),
            )
                .into_response();
        }
    };
    let Some(canonical) = backend["canonical"].as_str() else {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "backend_missing_canonical" })),
        )
            .into_response();
    };
    let domain = backend["domain"].as_str().unwrap_or_default();

    let signed = match state
        .signer
        .sign_canonical(domain, canonical.to_string(), Scheme::Ed25519)
    {
        Ok(signed) => signed,
        Err(e) => {
            warn!(error = %e, "re-signing failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "signer_failure" })),
            )
                .into_response();
        }
    };

    if !verification.confirmed {
        state.settlements.enqueue(&token.tx_hash, payer, expected);
    }

    (
        StatusCode::OK,
        Json(json!({
            "domain": signed.domain,
            "canonical": signed.canonical,
            "signature": signed.signature,
            "pubkey": signed.pubkey,
            "signing_scheme": signed.signing_scheme,
            "payment": {
                "protocol": "x402",
                "tx_hash": token.tx_hash,
                "confirmed": verification.confirmed,
            },
        })),
    )
        .into_response()
}

async fn proxy(state: &X402State, backend: &str, path_and_query: &str) -> Response {
    match fetch_backend(&state.client, backend, path_and_query).await {
        Ok((status, body)) => {
            (status, [("content-type", "application/json")], body).into_response()
        }
        Err(e) => (
            e.status(),
            Json(json!({ "error": "oracle_backend_error" })),
        )
            .into_response(),
    }
}

async fn info(State(state): State<Arc<X402State>>) -> Json<Value> {
    let config = &state.config;
    let depeg = state.depeg.state();
    let endpoints: serde_json::Map<String, Value> = state
        .routes
        .paid_paths()
        .map(|(path, entry)| (path.to_string(), json!({ "price": entry.price })))
        .collect();
    Json(json!({
        "protocol": "x402",
        "signing_scheme": "ed25519",
        "pubkey": state.signer.ed25519_pubkey_hex(),
        "payment_chain": config.chain_name,
        "payment_asset": config.asset_symbol,
        "payment_address": config.recipient,
        "asset_contract": config.asset_contract,
        "depeg_active": !depeg.peg_ok,
        "endpoints": endpoints,
    }))
}

async fn enforcement_probe(
    State(state): State<Arc<X402State>>,
    Path(address): Path<String>,
) -> Response {
    Json(state.enforcement.status(&address, Utc::now())).into_response()
}

//! The internal oracle backend API.
//!
//! This service runs behind the payment gateway and does the actual
//! work: evaluate the domain's aggregation engine, sign the assertion
//! under ECDSA, and serve the DLC event records. It binds on loopback;
//! the gateway is the only external surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use mycelia_aggregator::AggregateError;
use mycelia_attestor::EventStore;
use mycelia_signer::{AttestationSigner, Scheme};
use serde_json::json;
use tracing::warn;

use crate::engines::EngineRegistry;

const PRICE_ROUTES: &[(&str, &str)] = &[
    ("/oracle/btcusd", "btcusd"),
    ("/oracle/btcusd/vwap", "btcusd_vwap"),
    ("/oracle/ethusd", "ethusd"),
    ("/oracle/solusd", "solusd"),
    ("/oracle/eurusd", "eurusd"),
    ("/oracle/xauusd", "xauusd"),
    ("/oracle/soleur", "soleur"),
    ("/oracle/btceur", "btceur"),
];

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<EngineRegistry>,
    pub signer: Arc<AttestationSigner>,
    pub store: Arc<EventStore>,
    pub attestation_pair: String,
    pub digit_count: usize,
}

pub fn router(state: ApiState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/oracle/status", get(status))
        .route("/dlc/oracle/pubkey", get(dlc_pubkey))
        .route("/dlc/oracle/announcements", get(dlc_announcements))
        .route("/dlc/oracle/announcements/:eid", get(dlc_announcement))
        .route("/dlc/oracle/attestations/:eid", get(dlc_attestation))
        .route("/dlc/oracle/status", get(dlc_status));
    for (path, key) in PRICE_ROUTES.iter().copied() {
        router = router.route(path, get(move |state| price(state, key)));
    }
    router.with_state(state)
}

async fn price(State(state): State<ApiState>, key: &'static str) -> Response {
    let Some(engine) = state.registry.get(key) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response();
    };
    let assertion = match engine.evaluate().await {
        Ok(assertion) => assertion,
        Err(e @ (AggregateError::InsufficientQuorum { .. }
        | AggregateError::InsufficientTrades { .. })) => {
            warn!(domain = key, error = %e, "quorum not reached");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "insufficient_quorum", "detail": e.to_string() })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(domain = key, error = %e, "aggregation failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "aggregation_failed", "detail": e.to_string() })),
            )
                .into_response();
        }
    };
    match state.signer.sign(&assertion, Scheme::Ecdsa) {
        Ok(signed) => Json(signed).into_response(),
        Err(e) => {
            warn!(error = %e, "signer failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "signer_failure" })),
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": "v2",
        "pubkey": state.signer.ecdsa_pubkey_hex(),
        "endpoints": PRICE_ROUTES.iter().map(|(path, _)| *path).collect::<Vec<_>>(),
    }))
}

/// Live probe of every engine. Failures are reported per domain, never
/// as an overall error.
async fn status(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let probes = PRICE_ROUTES.iter().copied().filter_map(|(_, key)| {
        state.registry.get(key).map(|engine| async move {
            let outcome = match engine.evaluate().await {
                Ok(assertion) => json!({
                    "status": "ok",
                    "price": assertion.value,
                    "sources": assertion.sources,
                    "source_count": assertion.sources.len(),
                }),
                Err(e) => json!({ "status": "error", "error": e.to_string() }),
            };
            (key.to_string(), outcome)
        })
    });
    let report: serde_json::Map<String, serde_json::Value> =
        join_all(probes).await.into_iter().collect();
    Json(serde_json::Value::Object(report))
}

async fn dlc_pubkey(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "oracle_pubkey": state.signer.ecdsa_pubkey_hex(),
        "key_format": "compressed",
        "key_bytes": 33,
        "curve": "secp256k1",
    }))
}

async fn dlc_announcements(State(state): State<ApiState>) -> Response {
    match state.store.list_announcements() {
        Ok(announcements) => {
            let summaries: Vec<_> = announcements
                .iter()
                .map(|a| {
                    json!({
                        "event_id": a.event_id,
                        "pair": a.pair,
                        "maturity": a.maturity,
                        "digit_count": a.digit_count,
                        "created_at": a.created_at,
                    })
                })
                .collect();
            Json(json!({ "count": summaries.len(), "announcements": summaries }))
                .into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn dlc_announcement(
    State(state): State<ApiState>,
    Path(eid): Path<String>,
) -> Response {
    match state.store.announcement(&eid) {
        Ok(Some(announcement)) => Json(announcement).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown_event", "event_id": eid })),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

async fn dlc_attestation(
    State(state): State<ApiState>,
    Path(eid): Path<String>,
) -> Response {
    match state.store.attestation(&eid) {
        Ok(Some(attestation)) => Json(attestation).into_response(),
        Ok(None) => match state.store.announcement(&eid) {
            Ok(Some(announcement)) => (
                StatusCode::from_u16(425).expect("valid status"),
                Json(json!({
                    "error": "not_yet_attested",
                    "event_id": eid,
                    "maturity": announcement.maturity,
                })),
            )
                .into_response(),
            Ok(None) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown_event", "event_id": eid })),
            )
                .into_response(),
            Err(e) => store_error(e),
        },
        Err(e) => store_error(e),
    }
}

async fn dlc_status(State(state): State<ApiState>) -> Response {
    match state.store.counts() {
        Ok((announced, attested, missed)) => Json(json!({
            "oracle_pubkey": state.signer.ecdsa_pubkey_hex(),
            "announcements": announced,
            "attestations": attested,
            "missed": missed,
            "pending": announced.saturating_sub(attested + missed),
            "digit_count": state.digit_count,
            "pairs": [state.attestation_pair],
            "version": "v1",
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

fn store_error(e: mycelia_attestor::StoreError) -> Response {
    warn!(error = %e, "event store unavailable");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "event_store_unavailable" })),
    )
        .into_response()
}

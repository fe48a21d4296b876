//! Lightning-rail listener (L402).
//!
//! Unpaid requests get a macaroon + invoice challenge. A presented token
//! proves payment locally: the macaroon MAC verifies under the root key
//! and the preimage hashes to the payment hash the identifier embeds, so
//! redemption needs no round-trip to the node.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use crate::lnd::{Invoice, LndClient};
use crate::macaroon::Macaroon;
use crate::routes::{RouteMatch, RouteTable};
use crate::{fetch_backend, GatewayError};

pub struct L402State {
    pub routes: RouteTable<u64>,
    pub lnd: LndClient,
    pub root_key: [u8; 32],
    pub location: String,
    pub client: reqwest::Client,
}

pub fn router(state: Arc<L402State>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Validate a presented `<macaroon>:<preimage>` token against the root
/// key and the embedded payment hash.
pub fn verify_token(root_key: &[u8; 32], token: &str) -> Result<(), GatewayError> {
    let (credential, preimage_hex) = token
        .split_once(':')
        .ok_or_else(|| GatewayError::TokenInvalid("expected macaroon:preimage".to_string()))?;

    let macaroon = Macaroon::from_token(credential.trim())
        .ok_or_else(|| GatewayError::TokenInvalid("undecodable macaroon".to_string()))?;
    if !macaroon.verify(root_key) {
        return Err(GatewayError::TokenInvalid(
            "macaroon authentication failed".to_string(),
        ));
    }

    let preimage: [u8; 32] = hex::decode(preimage_hex.trim())
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| GatewayError::TokenInvalid("malformed preimage".to_string()))?;
    let payment_hash = macaroon
        .payment_hash()
        .ok_or_else(|| GatewayError::TokenInvalid("malformed identifier".to_string()))?;
    if mycelia_crypto::sha256(&preimage) != payment_hash {
        return Err(GatewayError::TokenInvalid(
            "preimage does not match invoice".to_string(),
        ));
    }
    Ok(())
}

/// The 402 challenge response. The body never carries assertion fields.
fn challenge_response(macaroon: &Macaroon, invoice: &Invoice) -> Response {
    let authenticate = format!(
        "L402 macaroon=\"{}\", invoice=\"{}\"",
        macaroon.to_base64(),
        invoice.payment_request
    );
    (
        StatusCode::PAYMENT_REQUIRED,
        [("WWW-Authenticate", authenticate)],
        "Payment Required",
    )
        .into_response()
}

async fn handle(
    State(state): State<Arc<L402State>>,
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

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if let Some(token) = auth
        .strip_prefix("L402 ")
        .or_else(|| auth.strip_prefix("LSAT "))
    {
        return match verify_token(&state.root_key, token) {
            Ok(()) => proxy(&state, &entry.backend, &path_and_query).await,
            Err(e) => {
                debug!(path = %path, error = %e, "token rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "invalid_token" })),
                )
                    .into_response()
            }
        };
    }

    let invoice = match state
        .lnd
        .create_invoice(entry.price, &format!("{} {}", state.location, path))
        .await
    {
        Ok(invoice) => invoice,
        Err(e) => {
            warn!(path = %path, error = %e, "invoice creation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "invoice_creation_failed" })),
            )
                .into_response();
        }
    };
    // Minted strictly after the invoice exists: the identifier binds to
    // its payment hash.
    let macaroon = Macaroon::mint(&state.root_key, &invoice.payment_hash, &state.location);
    challenge_response(&macaroon, &invoice)
}

async fn proxy(state: &L402State, backend: &str, path_and_query: &str) -> Response {
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mycelia_crypto::sha256;
    use std::collections::HashMap;
    use tower::util::ServiceExt;

    fn root() -> [u8; 32] {
        [3u8; 32]
    }

    #[test]
    fn test_token_with_matching_preimage_accepted() {
        let preimage = [9u8; 32];
        let macaroon = Macaroon::mint(&root(), &sha256(&preimage), "mycelia");
        let token = format!("{}:{}", macaroon.to_base64(), hex::encode(preimage));
        assert!(verify_token(&root(), &token).is_ok());
    }

    #[test]
    fn test_macaroon_bound_to_its_own_invoice() {
        // Minted for invoice A; redeemed with the preimage of invoice B.
        let preimage_a = [9u8; 32];
        let preimage_b = [10u8; 32];
        let macaroon = Macaroon::mint(&root(), &sha256(&preimage_a), "mycelia");
        let token = format!("{}:{}", macaroon.to_base64(), hex::encode(preimage_b));
        assert!(matches!(
            verify_token(&root(), &token),
            Err(GatewayError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_foreign_root_key_rejected() {
        let preimage = [9u8; 32];
        let macaroon = Macaroon::mint(&[4u8; 32], &sha256(&preimage), "mycelia");
        let token = format!("{}:{}", macaroon.to_base64(), hex::encode(preimage));
        assert!(verify_token(&root(), &token).is_err());
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        assert!(verify_token(&root(), "no-separator").is_err());
        assert!(verify_token(&root(), "deadbeef:oddlength1").is_err());
    }

    fn test_state() -> Arc<L402State> {
        let mut exact = HashMap::new();
        exact.insert(
            "/oracle/btcusd".to_string(),
            crate::routes::RouteEntry {
                backend: "http://127.0.0.1:1".to_string(),
                price: 10,
            },
        );
        Arc::new(L402State {
            routes: RouteTable::new(exact, vec![], HashMap::new()),
            lnd: LndClient::new("http://127.0.0.1:1", "00".to_string(), reqwest::Client::new()),
            root_key: root(),
            location: "mycelia".to_string(),
            client: reqwest::Client::new(),
        })
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/oracle/dogeusd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_token_is_401_without_invoice_call() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/oracle/btcusd")
                    .header("authorization", "L402 garbage:ff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_challenge_leaks_no_assertion_fields() {
        let invoice = Invoice {
            payment_request: "lnbc100n1example".to_string(),
            payment_hash: sha256(&[9u8; 32]),
        };
        let macaroon = Macaroon::mint(&root(), &invoice.payment_hash, "mycelia");
        let response = challenge_response(&macaroon, &invoice);
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let authenticate = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(authenticate.starts_with("L402 macaroon=\""));
        assert!(authenticate.contains("invoice=\"lnbc100n1example\""));
    }
}

//! Mycelia Gateway
//!
//! The payment-gating proxy: the only externally reachable surface. One
//! listener per rail. Unpaid requests become payment challenges; presented
//! tokens are validated against rail-specific state; validated requests
//! are forwarded to the internal oracle backend and re-wrapped with the
//! rail's signature block.

pub mod depeg;
pub mod enforcement;
pub mod l402;
pub mod lnd;
pub mod macaroon;
pub mod nonce;
pub mod routes;
pub mod settle;
pub mod x402;

use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy shared by both rails; each variant has one canonical
/// client-visible status.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("challenge failed: {0}")]
    ChallengeFailed(String),
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    #[error("token replayed: {0}")]
    TokenReplayed(String),
    #[error("admission denied: {0}")]
    AdmissionDenied(String),
    #[error("backend unavailable: {0}")]
    Backend(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ChallengeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            Self::TokenReplayed(_) => StatusCode::BAD_REQUEST,
            Self::AdmissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Forward a request to the route's backend with payment material
/// stripped, returning the response body.
pub(crate) async fn fetch_backend(
    client: &reqwest::Client,
    backend: &str,
    path_and_query: &str,
) -> Result<(StatusCode, String), GatewayError> {
    let url = format!("{}{}", backend.trim_end_matches('/'), path_and_query);
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    let status = StatusCode::from_u16(resp.status().as_u16())
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    let body = resp
        .text()
        .await
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    Ok((status, body))
}

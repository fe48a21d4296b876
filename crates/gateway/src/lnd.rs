//! Client for the external Lightning node's REST API.
//!
//! The node is a collaborator, not part of this system: it exposes
//! invoice creation over HTTPS with a bearer macaroon credential. One
//! invoice is created per 402 challenge; payment proof arrives later as
//! the preimage, so no further node calls happen on redemption.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::GatewayError;

#[derive(Debug, Clone)]
pub struct Invoice {
    pub payment_request: String,
    pub payment_hash: [u8; 32],
}

pub struct LndClient {
    base_url: String,
    credential_hex: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    payment_request: String,
    r_hash: String,
}

impl LndClient {
    pub fn new(base_url: &str, credential_hex: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_hex,
            client,
        }
    }

    /// Load the node credential from the configured macaroon file.
    pub fn from_credential_file(
        base_url: &str,
        credential_path: &std::path::Path,
        client: reqwest::Client,
    ) -> Result<Self, GatewayError> {
        let bytes = std::fs::read(credential_path).map_err(|e| {
            GatewayError::ChallengeFailed(format!(
                "cannot read node credential {}: {e}",
                credential_path.display()
            ))
        })?;
        Ok(Self::new(base_url, hex::encode(bytes), client))
    }

    pub async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
    ) -> Result<Invoice, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/v1/invoices", self.base_url))
            .header("Grpc-Metadata-macaroon", &self.credential_hex)
            .json(&json!({ "value": amount_sats.to_string(), "memo": memo }))
            .send()
            .await
            .map_err(|e| GatewayError::ChallengeFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::ChallengeFailed(format!(
                "invoice creation returned {status}"
            )));
        }
        let invoice: InvoiceResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::ChallengeFailed(e.to_string()))?;

        let payment_hash: [u8; 32] = BASE64
            .decode(&invoice.r_hash)
            .ok()
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                GatewayError::ChallengeFailed("malformed payment hash from node".to_string())
            })?;

        debug!(amount_sats, "invoice created");
        Ok(Invoice {
            payment_request: invoice.payment_request,
            payment_hash,
        })
    }
}

//! Stablecoin settlement against the EVM chain.
//!
//! Tokens are accepted optimistically: a pending transfer that decodes to
//! the right contract, recipient, and amount is honored immediately, and
//! the settlement check runs afterwards on a background cadence. A
//! settlement failure feeds the enforcement table; it never claws back a
//! response already delivered.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::enforcement::EnforcementTable;
use crate::GatewayError;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// ERC-20 `transfer(address,uint256)` selector.
const TRANSFER_SELECTOR: &str = "0xa9059cbb";

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub valid: bool,
    pub confirmed: bool,
    pub cause: Option<String>,
}

impl Verification {
    fn ok(confirmed: bool) -> Self {
        Self {
            valid: true,
            confirmed,
            cause: None,
        }
    }

    fn failed(confirmed: bool, cause: &str) -> Self {
        Self {
            valid: false,
            confirmed,
            cause: Some(cause.to_string()),
        }
    }
}

/// Verifies signed transfer authorizations against the chain RPC.
pub struct Facilitator {
    rpc_url: String,
    asset_contract: String,
    recipient: String,
    client: reqwest::Client,
}

impl Facilitator {
    pub fn new(
        rpc_url: &str,
        asset_contract: &str,
        recipient: &str,
        client: reqwest::Client,
    ) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            asset_contract: asset_contract.to_lowercase(),
            recipient: recipient.to_lowercase(),
            client,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 }))
            .send()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        if let Some(error) = body.get("error") {
            return Err(GatewayError::Backend(
                error["message"].as_str().unwrap_or("rpc error").to_string(),
            ));
        }
        Ok(body["result"].clone())
    }

    /// Verify a transfer, accepting a decodable pending transaction
    /// optimistically.
    pub async fn verify_transfer(
        &self,
        tx_hash: &str,
        expected_amount: u128,
    ) -> Result<Verification, GatewayError> {
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if !receipt.is_null() {
            return Ok(verify_receipt(
                &receipt,
                &self.asset_contract,
                &self.recipient,
                expected_amount,
            ));
        }

        let tx = self.rpc("eth_getTransactionByHash", json!([tx_hash])).await?;
        if tx.is_null() {
            return Ok(Verification::failed(false, "transaction_not_found"));
        }
        Ok(verify_pending(
            &tx,
            &self.asset_contract,
            &self.recipient,
            expected_amount,
        ))
    }
}

/// Check a mined receipt for the expected ERC-20 Transfer event.
pub fn verify_receipt(
    receipt: &Value,
    asset_contract: &str,
    recipient: &str,
    expected_amount: u128,
) -> Verification {
    if receipt["status"].as_str() != Some("0x1") {
        return Verification::failed(true, "transaction_reverted");
    }
    let logs = receipt["logs"].as_array().cloned().unwrap_or_default();
    for entry in &logs {
        if entry["address"].as_str().map(str::to_lowercase) != Some(asset_contract.to_string()) {
            continue;
        }
        let topics = entry["topics"].as_array().cloned().unwrap_or_default();
        if topics.len() < 3 || topics[0].as_str() != Some(TRANSFER_EVENT_TOPIC) {
            continue;
        }
        let Some(to_topic) = topics[2].as_str() else {
            continue;
        };
        // The recipient is a 32-byte left-padded address.
        let to = format!("0x{}", &to_topic[to_topic.len().saturating_sub(40)..]);
        if to.to_lowercase() != recipient {
            continue;
        }
        let Some(amount) = entry["data"].as_str().and_then(parse_hex_amount) else {
            return Verification::failed(true, "bad_transfer_amount");
        };
        return if amount >= expected_amount {
            Verification::ok(true)
        } else {
            Verification::failed(true, "insufficient_amount")
        };
    }
    Verification::failed(true, "no_transfer_found")
}

/// Decode an unmined transaction's calldata for optimistic delivery.
pub fn verify_pending(
    tx: &Value,
    asset_contract: &str,
    recipient: &str,
    expected_amount: u128,
) -> Verification {
    if tx["to"].as_str().map(str::to_lowercase) != Some(asset_contract.to_string()) {
        return Verification::failed(false, "not_asset_contract");
    }
    let input = tx["input"].as_str().unwrap_or_default();
    if !input.starts_with(TRANSFER_SELECTOR) {
        return Verification::failed(false, "not_transfer_call");
    }
    // transfer(address,uint256): selector(4) + address word(32) + amount word(32).
    if input.len() < 10 + 64 + 64 {
        return Verification::failed(false, "short_calldata");
    }
    let to = format!("0x{}", &input[10 + 24..10 + 64]);
    if to.to_lowercase() != recipient {
        return Verification::failed(false, "wrong_recipient");
    }
    let Some(amount) = parse_hex_amount(&input[10 + 64..10 + 128]) else {
        return Verification::failed(false, "bad_transfer_amount");
    };
    if amount < expected_amount {
        return Verification::failed(false, "insufficient_amount");
    }
    Verification::ok(false)
}

fn parse_hex_amount(data: &str) -> Option<u128> {
    let trimmed = data.trim_start_matches("0x").trim_start_matches('0');
    if trimmed.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(trimmed, 16).ok()
}

struct PendingSettlement {
    tx_hash: String,
    payer: String,
    expected_amount: u128,
    enqueued_at: Instant,
}

/// Background settlement accounting for optimistically delivered
/// responses.
pub struct SettlementWorker {
    facilitator: Arc<Facilitator>,
    enforcement: Arc<EnforcementTable>,
    queue: Mutex<Vec<PendingSettlement>>,
    /// A payment still unmined after this long counts as failed.
    timeout: Duration,
}

impl SettlementWorker {
    pub fn new(
        facilitator: Arc<Facilitator>,
        enforcement: Arc<EnforcementTable>,
        timeout: Duration,
    ) -> Self {
        Self {
            facilitator,
            enforcement,
            queue: Mutex::new(Vec::new()),
            timeout,
        }
    }

    pub fn enqueue(&self, tx_hash: &str, payer: &str, expected_amount: u128) {
        self.queue.lock().unwrap().push(PendingSettlement {
            tx_hash: tx_hash.to_string(),
            payer: payer.to_string(),
            expected_amount,
            enqueued_at: Instant::now(),
        });
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// One pass over the queue: settle what has mined, fail what has
    /// timed out, keep the rest.
    pub async fn drain_once(&self) {
        let batch: Vec<PendingSettlement> = {
            let mut queue = self.queue.lock().unwrap();
            std::mem::take(&mut *queue)
        };

        let mut keep = Vec::new();
        for entry in batch {
            if entry.enqueued_at.elapsed() > self.timeout {
                warn!(tx = %entry.tx_hash, payer = %entry.payer, "settlement timed out");
                self.enforcement.record_failure(&entry.payer, Utc::now());
                continue;
            }
            match self
                .facilitator
                .verify_transfer(&entry.tx_hash, entry.expected_amount)
                .await
            {
                Ok(v) if v.confirmed && v.valid => {
                    info!(tx = %entry.tx_hash, "settlement confirmed");
                }
                Ok(v) if v.confirmed => {
                    warn!(tx = %entry.tx_hash, cause = ?v.cause, "settlement failed");
                    self.enforcement.record_failure(&entry.payer, Utc::now());
                }
                Ok(_) => keep.push(entry),
                Err(e) => {
                    debug!(tx = %entry.tx_hash, error = %e, "settlement check unavailable");
                    keep.push(entry);
                }
            }
        }
        self.queue.lock().unwrap().extend(keep);
    }

    pub async fn run(self: Arc<Self>, interval: Duration) {
        loop {
            self.drain_once().await;
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

    fn receipt(amount_hex: &str, recipient: &str) -> Value {
        json!({
            "status": "0x1",
            "logs": [{
                "address": ASSET,
                "topics": [
                    TRANSFER_EVENT_TOPIC,
                    "0x0000000000000000000000002222222222222222222222222222222222222222",
                    format!("0x000000000000000000000000{}", &recipient[2..]),
                ],
                "data": amount_hex,
            }]
        })
    }

    #[test]
    fn test_mined_transfer_accepted() {
        // 1000 USDC base units = 0x3e8
        let v = verify_receipt(&receipt("0x3e8", RECIPIENT), ASSET, RECIPIENT, 1000);
        assert_eq!(v, Verification::ok(true));
    }

    #[test]
    fn test_mined_underpayment_rejected() {
        let v = verify_receipt(&receipt("0x3e7", RECIPIENT), ASSET, RECIPIENT, 1000);
        assert!(!v.valid);
        assert_eq!(v.cause.as_deref(), Some("insufficient_amount"));
    }

    #[test]
    fn test_transfer_to_wrong_recipient_rejected() {
        let other = "0x3333333333333333333333333333333333333333";
        let v = verify_receipt(&receipt("0x3e8", other), ASSET, RECIPIENT, 1000);
        assert_eq!(v.cause.as_deref(), Some("no_transfer_found"));
    }

    #[test]
    fn test_reverted_transaction_rejected() {
        let v = verify_receipt(&json!({"status": "0x0", "logs": []}), ASSET, RECIPIENT, 1000);
        assert_eq!(v.cause.as_deref(), Some("transaction_reverted"));
    }

    fn pending_tx(to: &str, recipient: &str, amount: u128) -> Value {
        json!({
            "to": to,
            "input": format!(
                "0xa9059cbb000000000000000000000000{}{:064x}",
                &recipient[2..],
                amount
            ),
        })
    }

    #[test]
    fn test_pending_transfer_accepted_optimistically() {
        let v = verify_pending(
            &pending_tx(ASSET, RECIPIENT, 1000),
            ASSET,
            RECIPIENT,
            1000,
        );
        assert_eq!(v, Verification::ok(false));
    }

    #[test]
    fn test_pending_wrong_contract_rejected() {
        let v = verify_pending(
            &pending_tx("0x4444444444444444444444444444444444444444", RECIPIENT, 1000),
            ASSET,
            RECIPIENT,
            1000,
        );
        assert_eq!(v.cause.as_deref(), Some("not_asset_contract"));
    }

    #[test]
    fn test_pending_wrong_recipient_rejected() {
        let other = "0x3333333333333333333333333333333333333333";
        let v = verify_pending(&pending_tx(ASSET, other, 1000), ASSET, RECIPIENT, 1000);
        assert_eq!(v.cause.as_deref(), Some("wrong_recipient"));
    }

    #[test]
    fn test_parse_hex_amount() {
        assert_eq!(parse_hex_amount("0x3e8"), Some(1000));
        assert_eq!(
            parse_hex_amount("00000000000000000000000000000000000000000000000000000000000003e8"),
            Some(1000)
        );
        assert_eq!(parse_hex_amount("0x0"), Some(0));
        assert_eq!(parse_hex_amount("zz"), None);
    }
}

//! Trade-history adapters for VWAP domains.
//!
//! Each adapter returns the venue's recent executions clipped to the
//! lookback window; pooling and the volume-weighted reduction happen in
//! the aggregation layer.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::{FetchContext, FetchError, Trade, TradeFetcher};

type DecodeTrades = fn(&str) -> Result<Vec<Trade>, String>;

pub struct TradeFeed {
    source: &'static str,
    url: &'static str,
    decode: DecodeTrades,
}

impl TradeFeed {
    pub const fn new(source: &'static str, url: &'static str, decode: DecodeTrades) -> Self {
        Self {
            source,
            url,
            decode,
        }
    }
}

impl TradeFetcher for TradeFeed {
    fn source_id(&self) -> &'static str {
        self.source
    }

    fn fetch<'a>(
        &'a self,
        ctx: &'a FetchContext,
        window: Duration,
    ) -> BoxFuture<'a, Result<Vec<Trade>, FetchError>> {
        async move {
            let body = ctx.get_text(self.source, self.url).await?;
            let trades = (self.decode)(&body).map_err(FetchError::Parse)?;
            Ok(clip_to_window(trades, window))
        }
        .boxed()
    }
}

/// Keep trades executed inside the window. Trades the venue leaves
/// untimestamped are kept; the endpoint already bounds its history.
pub fn clip_to_window(trades: Vec<Trade>, window: Duration) -> Vec<Trade> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(5));
    trades
        .into_iter()
        .filter(|t| t.executed_at.map(|at| at >= cutoff).unwrap_or(true))
        .filter(|t| t.price.is_finite() && t.volume.is_finite() && t.volume > 0.0)
        .collect()
}

/// Coinbase `/products/<PAIR>/trades`: `[{"price","size","time"}]`
pub fn decode_coinbase_trades(body: &str) -> Result<Vec<Trade>, String> {
    let v: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let entries = v.as_array().ok_or_else(|| "expected array".to_string())?;
    entries
        .iter()
        .map(|t| {
            let price = t["price"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "bad trade price".to_string())?;
            let volume = t["size"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "bad trade size".to_string())?;
            let executed_at = t["time"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            Ok(Trade {
                price,
                volume,
                executed_at,
            })
        })
        .collect()
}

/// Kraken `/0/public/Trades`: `{"result": {"<PAIR>": [[price, volume, time, ...]]}}`
pub fn decode_kraken_trades(body: &str) -> Result<Vec<Trade>, String> {
    let v: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let result = v["result"]
        .as_object()
        .ok_or_else(|| "missing result".to_string())?;
    let rows = result
        .values()
        .find(|entry| entry.is_array())
        .and_then(|entry| entry.as_array())
        .ok_or_else(|| "no trade rows".to_string())?;
    rows.iter()
        .map(|row| {
            let price = row[0]
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "bad trade price".to_string())?;
            let volume = row[1]
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "bad trade volume".to_string())?;
            let executed_at = row[2]
                .as_f64()
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
            Ok(Trade {
                price,
                volume,
                executed_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_coinbase_trades() {
        let body = r#"[
            {"time":"2026-08-01T12:00:01Z","trade_id":1,"price":"69000.00","size":"0.5","side":"buy"},
            {"time":"2026-08-01T12:00:02Z","trade_id":2,"price":"69001.00","size":"0.25","side":"sell"}
        ]"#;
        let trades = decode_coinbase_trades(body).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 69000.00);
        assert_eq!(trades[1].volume, 0.25);
        assert!(trades[0].executed_at.is_some());
    }

    #[test]
    fn test_decode_kraken_trades() {
        let body = r#"{"error":[],"result":{"XXBTZUSD":[
            ["69002.1","0.01000000",1754049601.123,"b","l",""],
            ["69003.4","0.20000000",1754049602.456,"s","m",""]
        ],"last":"175404960245"}}"#;
        let trades = decode_kraken_trades(body).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 69002.1);
        assert_eq!(trades[1].volume, 0.2);
    }

    #[test]
    fn test_clip_drops_old_and_degenerate_trades() {
        let now = Utc::now();
        let trades = vec![
            Trade {
                price: 100.0,
                volume: 1.0,
                executed_at: Some(now),
            },
            Trade {
                price: 101.0,
                volume: 1.0,
                executed_at: Some(now - chrono::Duration::minutes(30)),
            },
            Trade {
                price: 102.0,
                volume: 0.0,
                executed_at: Some(now),
            },
        ];
        let kept = clip_to_window(trades, Duration::from_secs(300));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].price, 100.0);
    }
}

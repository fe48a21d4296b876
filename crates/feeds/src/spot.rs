//! Spot-price ticker adapters.
//!
//! A [`Ticker`] is one venue endpoint plus the decoder for its body shape.
//! Decoders are plain functions over the response text so each venue's
//! wire format can be tested against literal payloads.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::{FetchContext, FetchError, FetchResult, Fetcher, Sample};

type Decode = fn(&str) -> Result<f64, String>;

pub struct Ticker {
    source: &'static str,
    url: &'static str,
    decode: Decode,
}

impl Ticker {
    pub const fn new(source: &'static str, url: &'static str, decode: Decode) -> Self {
        Self {
            source,
            url,
            decode,
        }
    }
}

impl Fetcher for Ticker {
    fn source_id(&self) -> &'static str {
        self.source
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let body = ctx.get_text(self.source, self.url).await?;
            let value = (self.decode)(&body).map_err(FetchError::Parse)?;
            if !value.is_finite() || value <= 0.0 {
                return Err(FetchError::Parse(format!("implausible quote {value}")));
            }
            Ok(Sample::spot(self.source, value))
        }
        .boxed()
    }
}

fn json(body: &str) -> Result<Value, String> {
    serde_json::from_str(body).map_err(|e| e.to_string())
}

fn number(v: &Value) -> Result<f64, String> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| "non-finite number".to_string()),
        Value::String(s) => s.parse().map_err(|_| format!("bad numeric string {s:?}")),
        other => Err(format!("expected number, got {other}")),
    }
}

/// Coinbase Exchange `/products/<PAIR>/ticker`: `{"price": "..."}`
pub fn decode_coinbase_ticker(body: &str) -> Result<f64, String> {
    number(&json(body)?["price"])
}

/// Coinbase retail `/v2/prices/<PAIR>/spot`: `{"data": {"amount": "..."}}`
pub fn decode_coinbase_spot(body: &str) -> Result<f64, String> {
    number(&json(body)?["data"]["amount"])
}

/// Kraken `/0/public/Ticker`: `{"result": {"<PAIR>": {"c": ["...", ...]}}}`
/// The result key is Kraken's internal pair name, so take the first entry.
pub fn decode_kraken_ticker(body: &str) -> Result<f64, String> {
    let v = json(body)?;
    let result = v["result"]
        .as_object()
        .ok_or_else(|| "missing result".to_string())?;
    let pair = result.values().next().ok_or_else(|| "empty result".to_string())?;
    number(&pair["c"][0])
}

/// Bitstamp `/api/v2/ticker/<pair>/`: `{"last": "..."}`
pub fn decode_bitstamp(body: &str) -> Result<f64, String> {
    number(&json(body)?["last"])
}

/// Gemini `/v1/pubticker/<pair>`: `{"last": "..."}`
pub fn decode_gemini(body: &str) -> Result<f64, String> {
    number(&json(body)?["last"])
}

/// Bitfinex `/v2/ticker/<pair>`: positional array, LAST_PRICE at index 6.
pub fn decode_bitfinex(body: &str) -> Result<f64, String> {
    number(&json(body)?[6])
}

/// Binance-style `/api/v3/ticker/price`: `{"price": "..."}`
pub fn decode_binance(body: &str) -> Result<f64, String> {
    number(&json(body)?["price"])
}

/// OKX `/api/v5/market/ticker`: `{"data": [{"last": "..."}]}`
pub fn decode_okx(body: &str) -> Result<f64, String> {
    number(&json(body)?["data"][0]["last"])
}

/// Gate.io `/api/v4/spot/tickers`: `[{"last": "..."}]`
pub fn decode_gateio(body: &str) -> Result<f64, String> {
    number(&json(body)?[0]["last"])
}

/// Bybit `/v5/market/tickers`: `{"result": {"list": [{"lastPrice": "..."}]}}`
pub fn decode_bybit(body: &str) -> Result<f64, String> {
    number(&json(body)?["result"]["list"][0]["lastPrice"])
}

/// Kitco precious-metals CSV: bid price at field 5.
pub fn decode_kitco(body: &str) -> Result<f64, String> {
    let parts: Vec<&str> = body.trim().split(',').collect();
    let field = parts.get(5).ok_or_else(|| "short kitco record".to_string())?;
    field
        .trim()
        .parse()
        .map_err(|_| format!("bad kitco field {field:?}"))
}

/// Dealer HTML pages: first dollar amount inside the plausible gold range.
pub fn decode_gold_dealer_page(body: &str) -> Result<f64, String> {
    let re = regex::Regex::new(r"\$([\d,]+\.\d+)").expect("static pattern");
    for cap in re.captures_iter(body) {
        let raw = cap[1].replace(',', "");
        if let Ok(value) = raw.parse::<f64>() {
            if (1_000.0..20_000.0).contains(&value) {
                return Ok(value);
            }
        }
    }
    Err("no in-range dollar price on page".to_string())
}

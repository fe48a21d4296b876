//! Official-rate adapters: central-bank publications.
//!
//! These sources release once per business day, so every adapter carries
//! the publication timestamp into the sample and reports `stale` when the
//! release falls outside the configured acceptance window. Pairs the bank
//! does not publish directly are derived from two published rates.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::{FetchContext, FetchError, FetchResult, Fetcher, Sample};

fn official_sample(
    source: &'static str,
    value: f64,
    published: DateTime<Utc>,
    ctx: &FetchContext,
) -> FetchResult {
    let max_age = chrono::Duration::from_std(ctx.official_max_age())
        .unwrap_or_else(|_| chrono::Duration::days(36500));
    if Utc::now() - published > max_age {
        return Err(FetchError::Stale { published });
    }
    if !value.is_finite() || value <= 0.0 {
        return Err(FetchError::Parse(format!("implausible rate {value}")));
    }
    Ok(Sample {
        source_id: source.to_string(),
        value,
        volume: None,
        captured_at: published,
    })
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc()
}

/// ECB reference rate via the frankfurter API.
pub struct EcbRate;

pub fn parse_frankfurter(body: &str) -> Result<(f64, NaiveDate), String> {
    let v: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let rate = v["rates"]["USD"]
        .as_f64()
        .ok_or_else(|| "missing rates.USD".to_string())?;
    let date = v["date"]
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| "missing date".to_string())?;
    Ok((rate, date))
}

impl Fetcher for EcbRate {
    fn source_id(&self) -> &'static str {
        "ecb"
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let body = ctx
                .get_text("ecb", "https://api.frankfurter.dev/v1/latest?symbols=USD")
                .await?;
            let (rate, date) = parse_frankfurter(&body).map_err(FetchError::Parse)?;
            official_sample("ecb", rate, midnight_utc(date), ctx)
        }
        .boxed()
    }
}

/// Bank of Canada valet API. EURUSD is not published directly; it is
/// derived as EURCAD / USDCAD from the same release.
pub struct BankOfCanadaRate;

pub fn parse_boc_observation(body: &str, series: &str) -> Result<(f64, NaiveDate), String> {
    let v: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let obs = v["observations"][0]
        .as_object()
        .ok_or_else(|| "missing observations".to_string())?;
    let rate = obs
        .get(series)
        .and_then(|s| s["v"].as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| format!("missing series {series}"))?;
    let date = obs
        .get("d")
        .and_then(|d| d.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| "missing observation date".to_string())?;
    Ok((rate, date))
}

impl Fetcher for BankOfCanadaRate {
    fn source_id(&self) -> &'static str {
        "bankofcanada"
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let eurcad_body = ctx
                .get_text(
                    "bankofcanada",
                    "https://www.bankofcanada.ca/valet/observations/FXEURCAD/json?recent=1",
                )
                .await?;
            let usdcad_body = ctx
                .get_text(
                    "bankofcanada",
                    "https://www.bankofcanada.ca/valet/observations/FXUSDCAD/json?recent=1",
                )
                .await?;
            let (eurcad, date) =
                parse_boc_observation(&eurcad_body, "FXEURCAD").map_err(FetchError::Parse)?;
            let (usdcad, _) =
                parse_boc_observation(&usdcad_body, "FXUSDCAD").map_err(FetchError::Parse)?;
            if usdcad == 0.0 {
                return Err(FetchError::Parse("zero USDCAD rate".to_string()));
            }
            official_sample("bankofcanada", eurcad / usdcad, midnight_utc(date), ctx)
        }
        .boxed()
    }
}

/// Reserve Bank of Australia RSS release. EURUSD derived from the
/// published AUD crosses.
pub struct RbaRate;

pub fn parse_rba(body: &str) -> Result<(f64, Option<DateTime<Utc>>), String> {
    let usd_re = regex::Regex::new(r"AU:\s+([\d.]+)\s+USD\s+=\s+1\s+AUD").expect("static pattern");
    let eur_re = regex::Regex::new(r"AU:\s+([\d.]+)\s+EUR\s+=\s+1\s+AUD").expect("static pattern");
    let aud_usd: f64 = usd_re
        .captures(body)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| "no USD rate in RBA feed".to_string())?;
    let aud_eur: f64 = eur_re
        .captures(body)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| "no EUR rate in RBA feed".to_string())?;
    if aud_eur == 0.0 {
        return Err("zero EUR rate in RBA feed".to_string());
    }

    let pub_re = regex::Regex::new(r"<pubDate>([^<]+)</pubDate>").expect("static pattern");
    let published = pub_re
        .captures(body)
        .and_then(|c| DateTime::parse_from_rfc2822(c[1].trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok((aud_usd / aud_eur, published))
}

impl Fetcher for RbaRate {
    fn source_id(&self) -> &'static str {
        "rba"
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let body = ctx
                .get_text("rba", "https://www.rba.gov.au/rss/rss-cb-exchange-rates.xml")
                .await?;
            let (rate, published) = parse_rba(&body).map_err(FetchError::Parse)?;
            official_sample("rba", rate, published.unwrap_or_else(Utc::now), ctx)
        }
        .boxed()
    }
}

/// Norges Bank SDMX API. EURUSD derived as EURNOK / USDNOK.
pub struct NorgesBankRate;

pub fn parse_norges(body: &str) -> Result<(f64, Option<NaiveDate>), String> {
    let v: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let observations = v["data"]["dataSets"][0]["series"]["0:0:0:0"]["observations"]
        .as_object()
        .ok_or_else(|| "missing observations".to_string())?;
    let last_key = observations
        .keys()
        .max_by_key(|k| k.parse::<u64>().unwrap_or(0))
        .ok_or_else(|| "empty observations".to_string())?;
    let rate = observations[last_key][0]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| observations[last_key][0].as_f64())
        .ok_or_else(|| "bad observation value".to_string())?;

    let date = v["data"]["structure"]["dimensions"]["observation"][0]["values"]
        .as_array()
        .and_then(|values| values.last())
        .and_then(|last| last["id"].as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    Ok((rate, date))
}

impl Fetcher for NorgesBankRate {
    fn source_id(&self) -> &'static str {
        "norgesbank"
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let eurnok_body = ctx
                .get_text(
                    "norgesbank",
                    "https://data.norges-bank.no/api/data/EXR/B.EUR.NOK.SP?format=sdmx-json&lastNObservations=1",
                )
                .await?;
            let usdnok_body = ctx
                .get_text(
                    "norgesbank",
                    "https://data.norges-bank.no/api/data/EXR/B.USD.NOK.SP?format=sdmx-json&lastNObservations=1",
                )
                .await?;
            let (eurnok, date) = parse_norges(&eurnok_body).map_err(FetchError::Parse)?;
            let (usdnok, _) = parse_norges(&usdnok_body).map_err(FetchError::Parse)?;
            if usdnok == 0.0 {
                return Err(FetchError::Parse("zero USDNOK rate".to_string()));
            }
            let published = date.map(midnight_utc).unwrap_or_else(Utc::now);
            official_sample("norgesbank", eurnok / usdnok, published, ctx)
        }
        .boxed()
    }
}

/// Czech National Bank daily fixing, pipe-delimited text.
pub struct CnbRate;

pub fn parse_cnb(body: &str) -> Result<(f64, NaiveDate), String> {
    let mut lines = body.trim().lines();
    let header = lines.next().ok_or_else(|| "empty CNB release".to_string())?;
    let date_part = header.split('#').next().unwrap_or(header).trim();
    let date = NaiveDate::parse_from_str(date_part, "%d %b %Y")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d.%m.%Y"))
        .map_err(|_| format!("bad CNB date {date_part:?}"))?;

    let mut eur = None;
    let mut usd = None;
    for line in lines.skip(1) {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 5 {
            continue;
        }
        let amount: f64 = match parts[2].trim().parse() {
            Ok(a) if a > 0.0 => a,
            _ => continue,
        };
        let rate: f64 = match parts[4].trim().parse() {
            Ok(r) => r,
            Err(_) => continue,
        };
        match parts[3].trim() {
            "EUR" => eur = Some(rate / amount),
            "USD" => usd = Some(rate / amount),
            _ => {}
        }
    }

    match (eur, usd) {
        (Some(e), Some(u)) if u > 0.0 => Ok((e / u, date)),
        _ => Err("CNB release missing EUR or USD".to_string()),
    }
}

impl Fetcher for CnbRate {
    fn source_id(&self) -> &'static str {
        "cnb"
    }

    fn fetch<'a>(&'a self, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        async move {
            let body = ctx
                .get_text(
                    "cnb",
                    "https://www.cnb.cz/en/financial-markets/foreign-exchange-market/central-bank-exchange-rate-fixing/central-bank-exchange-rate-fixing/daily.txt",
                )
                .await?;
            let (rate, date) = parse_cnb(&body).map_err(FetchError::Parse)?;
            official_sample("cnb", rate, midnight_utc(date), ctx)
        }
        .boxed()
    }
}

//! Source catalogs per asset.
//!
//! Each paid domain draws on a fixed venue set. Crypto pairs carry two
//! tiers: venues quoting the target currency directly, and venues quoting
//! the stablecoin whose samples are rebased through an independently
//! sourced reference rate. Gold swaps the tiers: dealer quotes form the
//! primary tier and tokenized gold the secondary.

use crate::official::{BankOfCanadaRate, CnbRate, EcbRate, NorgesBankRate, RbaRate};
use crate::spot::{
    decode_binance, decode_bitfinex, decode_bitstamp, decode_bybit, decode_coinbase_spot,
    decode_coinbase_ticker, decode_gateio, decode_gemini, decode_gold_dealer_page, decode_kitco,
    decode_kraken_ticker, decode_okx, Ticker,
};
use crate::trades::{decode_coinbase_trades, decode_kraken_trades, TradeFeed};
use crate::{Fetcher, TradeFetcher};

/// A two-tier spot source set with quorum minimums.
pub struct TieredSet {
    /// Venues quoting the target currency; the coherence baseline.
    pub primary: Vec<Box<dyn Fetcher>>,
    /// Secondary-tier venues already quoting the target currency.
    pub secondary_native: Vec<Box<dyn Fetcher>>,
    /// Secondary-tier venues quoting the stablecoin; rebased before use.
    pub secondary_rebased: Vec<Box<dyn Fetcher>>,
    /// Minimum union size when the secondary tier participates.
    pub min_sources: usize,
    /// Minimum primary-tier size after the secondary tier is dropped.
    pub min_primary_sources: usize,
}

/// USDT/USD reference venues for rebasing the stablecoin tier.
pub fn usdt_reference() -> Vec<Box<dyn Fetcher>> {
    vec![
        Box::new(Ticker::new(
            "kraken",
            "https://api.kraken.com/0/public/Ticker?pair=USDTZUSD",
            decode_kraken_ticker,
        )),
        Box::new(Ticker::new(
            "bitstamp",
            "https://www.bitstamp.net/api/v2/ticker/usdtusd/",
            decode_bitstamp,
        )),
    ]
}

/// USDC/USD venues feeding the depeg circuit breaker.
pub fn usdc_depeg_sources() -> Vec<Box<dyn Fetcher>> {
    vec![
        Box::new(Ticker::new(
            "kraken",
            "https://api.kraken.com/0/public/Ticker?pair=USDCUSD",
            decode_kraken_ticker,
        )),
        Box::new(Ticker::new(
            "bitstamp",
            "https://www.bitstamp.net/api/v2/ticker/usdcusd/",
            decode_bitstamp,
        )),
        Box::new(Ticker::new(
            "coinbase",
            "https://api.exchange.coinbase.com/products/USDC-USD/ticker",
            decode_coinbase_ticker,
        )),
        Box::new(Ticker::new(
            "gemini",
            "https://api.gemini.com/v1/pubticker/usdcusd",
            decode_gemini,
        )),
        Box::new(Ticker::new(
            "bitfinex",
            "https://api-pub.bitfinex.com/v2/ticker/tUDCUSD",
            decode_bitfinex,
        )),
    ]
}

/// BTCUSD: six USD venues, three USDT venues. 6-of-9, or 4-of-6 USD-only.
pub fn btcusd() -> TieredSet {
    TieredSet {
        primary: vec![
            Box::new(Ticker::new(
                "coinbase",
                "https://api.exchange.coinbase.com/products/BTC-USD/ticker",
                decode_coinbase_ticker,
            )),
            Box::new(Ticker::new(
                "kraken",
                "https://api.kraken.com/0/public/Ticker?pair=XBTUSD",
                decode_kraken_ticker,
            )),
            Box::new(Ticker::new(
                "bitstamp",
                "https://www.bitstamp.net/api/v2/ticker/btcusd/",
                decode_bitstamp,
            )),
            Box::new(Ticker::new(
                "gemini",
                "https://api.gemini.com/v1/pubticker/btcusd",
                decode_gemini,
            )),
            Box::new(Ticker::new(
                "bitfinex",
                "https://api-pub.bitfinex.com/v2/ticker/tBTCUSD",
                decode_bitfinex,
            )),
            Box::new(Ticker::new(
                "binance_us",
                "https://api.binance.us/api/v3/ticker/price?symbol=BTCUSD",
                decode_binance,
            )),
        ],
        secondary_native: vec![],
        secondary_rebased: vec![
            Box::new(Ticker::new(
                "binance",
                "https://data-api.binance.vision/api/v3/ticker/price?symbol=BTCUSDT",
                decode_binance,
            )),
            Box::new(Ticker::new(
                "okx",
                "https://www.okx.com/api/v5/market/ticker?instId=BTC-USDT",
                decode_okx,
            )),
            Box::new(Ticker::new(
                "gateio",
                "https://api.gateio.ws/api/v4/spot/tickers?currency_pair=BTC_USDT",
                decode_gateio,
            )),
        ],
        min_sources: 6,
        min_primary_sources: 4,
    }
}

/// ETHUSD mirrors the BTCUSD venue set.
pub fn ethusd() -> TieredSet {
    TieredSet {
        primary: vec![
            Box::new(Ticker::new(
                "coinbase",
                "https://api.exchange.coinbase.com/products/ETH-USD/ticker",
                decode_coinbase_ticker,
            )),
            Box::new(Ticker::new(
                "kraken",
                "https://api.kraken.com/0/public/Ticker?pair=ETHUSD",
                decode_kraken_ticker,
            )),
            Box::new(Ticker::new(
                "bitstamp",
                "https://www.bitstamp.net/api/v2/ticker/ethusd/",
                decode_bitstamp,
            )),
            Box::new(Ticker::new(
                "gemini",
                "https://api.gemini.com/v1/pubticker/ethusd",
                decode_gemini,
            )),
            Box::new(Ticker::new(
                "bitfinex",
                "https://api-pub.bitfinex.com/v2/ticker/tETHUSD",
                decode_bitfinex,
            )),
            Box::new(Ticker::new(
                "binance_us",
                "https://api.binance.us/api/v3/ticker/price?symbol=ETHUSD",
                decode_binance,
            )),
        ],
        secondary_native: vec![],
        secondary_rebased: vec![
            Box::new(Ticker::new(
                "binance",
                "https://data-api.binance.vision/api/v3/ticker/price?symbol=ETHUSDT",
                decode_binance,
            )),
            Box::new(Ticker::new(
                "okx",
                "https://www.okx.com/api/v5/market/ticker?instId=ETH-USDT",
                decode_okx,
            )),
            Box::new(Ticker::new(
                "gateio",
                "https://api.gateio.ws/api/v4/spot/tickers?currency_pair=ETH_USDT",
                decode_gateio,
            )),
        ],
        min_sources: 6,
        min_primary_sources: 4,
    }
}

/// SOLUSD: five USD venues, four USDT venues. 5-of-9, or 3-of-5 USD-only.
pub fn solusd() -> TieredSet {
    TieredSet {
        primary: vec![
            Box::new(Ticker::new(
                "coinbase",
                "https://api.exchange.coinbase.com/products/SOL-USD/ticker",
                decode_coinbase_ticker,
            )),
            Box::new(Ticker::new(
                "kraken",
                "https://api.kraken.com/0/public/Ticker?pair=SOLUSD",
                decode_kraken_ticker,
            )),
            Box::new(Ticker::new(
                "bitstamp",
                "https://www.bitstamp.net/api/v2/ticker/solusd/",
                decode_bitstamp,
            )),
            Box::new(Ticker::new(
                "gemini",
                "https://api.gemini.com/v1/pubticker/solusd",
                decode_gemini,
            )),
            Box::new(Ticker::new(
                "bitfinex",
                "https://api-pub.bitfinex.com/v2/ticker/tSOLUSD",
                decode_bitfinex,
            )),
        ],
        secondary_native: vec![],
        secondary_rebased: vec![
            Box::new(Ticker::new(
                "binance",
                "https://data-api.binance.vision/api/v3/ticker/price?symbol=SOLUSDT",
                decode_binance,
            )),
            Box::new(Ticker::new(
                "okx",
                "https://www.okx.com/api/v5/market/ticker?instId=SOL-USDT",
                decode_okx,
            )),
            Box::new(Ticker::new(
                "gateio",
                "https://api.gateio.ws/api/v4/spot/tickers?currency_pair=SOL_USDT",
                decode_gateio,
            )),
            Box::new(Ticker::new(
                "bybit",
                "https://api.bybit.com/v5/market/tickers?category=spot&symbol=SOLUSDT",
                decode_bybit,
            )),
        ],
        min_sources: 5,
        min_primary_sources: 3,
    }
}

/// XAUUSD: dealer quotes primary; tokenized gold (PAXG) secondary, with
/// the USDT-quoted venues rebased. 3 minimum, or 2 dealer-only.
pub fn xauusd() -> TieredSet {
    TieredSet {
        primary: vec![
            Box::new(Ticker::new(
                "kitco",
                "https://proxy.kitco.com/getPM?symbol=AU&currency=USD",
                decode_kitco,
            )),
            Box::new(Ticker::new(
                "jmbullion",
                "https://www.jmbullion.com/charts/gold-price/",
                decode_gold_dealer_page,
            )),
            Box::new(Ticker::new(
                "goldbroker",
                "https://www.goldbroker.com/charts/gold-price/usd",
                decode_gold_dealer_page,
            )),
        ],
        secondary_native: vec![
            Box::new(Ticker::new(
                "coinbase",
                "https://api.coinbase.com/v2/prices/PAXG-USD/spot",
                decode_coinbase_spot,
            )),
            Box::new(Ticker::new(
                "kraken",
                "https://api.kraken.com/0/public/Ticker?pair=PAXGUSD",
                decode_kraken_ticker,
            )),
            Box::new(Ticker::new(
                "gemini",
                "https://api.gemini.com/v1/pubticker/paxgusd",
                decode_gemini,
            )),
        ],
        secondary_rebased: vec![
            Box::new(Ticker::new(
                "binance",
                "https://data-api.binance.vision/api/v3/ticker/price?symbol=PAXGUSDT",
                decode_binance,
            )),
            Box::new(Ticker::new(
                "okx",
                "https://www.okx.com/api/v5/market/ticker?instId=PAXG-USDT",
                decode_okx,
            )),
        ],
        min_sources: 3,
        min_primary_sources: 2,
    }
}

/// SOLEUR direct venues. The hybrid domain adds one synthetic
/// cross-rate source on top; minimum 2 of the resulting 4.
pub fn soleur_direct() -> (Vec<Box<dyn Fetcher>>, usize) {
    let sources: Vec<Box<dyn Fetcher>> = vec![
        Box::new(Ticker::new(
            "coinbase",
            "https://api.exchange.coinbase.com/products/SOL-EUR/ticker",
            decode_coinbase_ticker,
        )),
        Box::new(Ticker::new(
            "kraken",
            "https://api.kraken.com/0/public/Ticker?pair=SOLEUR",
            decode_kraken_ticker,
        )),
        Box::new(Ticker::new(
            "bitstamp",
            "https://www.bitstamp.net/api/v2/ticker/soleur/",
            decode_bitstamp,
        )),
    ];
    (sources, 2)
}

/// EURUSD: five central banks and two exchange venues, minimum 4 of 7.
pub fn eurusd() -> (Vec<Box<dyn Fetcher>>, usize) {
    let sources: Vec<Box<dyn Fetcher>> = vec![
        Box::new(EcbRate),
        Box::new(BankOfCanadaRate),
        Box::new(RbaRate),
        Box::new(NorgesBankRate),
        Box::new(CnbRate),
        Box::new(Ticker::new(
            "kraken",
            "https://api.kraken.com/0/public/Ticker?pair=EURUSD",
            decode_kraken_ticker,
        )),
        Box::new(Ticker::new(
            "bitstamp",
            "https://www.bitstamp.net/api/v2/ticker/eurusd/",
            decode_bitstamp,
        )),
    ];
    (sources, 4)
}

/// BTCUSD trade-history venues for the VWAP domain.
pub fn btcusd_trades() -> Vec<Box<dyn TradeFetcher>> {
    vec![
        Box::new(TradeFeed::new(
            "coinbase",
            "https://api.exchange.coinbase.com/products/BTC-USD/trades",
            decode_coinbase_trades,
        )),
        Box::new(TradeFeed::new(
            "kraken",
            "https://api.kraken.com/0/public/Trades?pair=XBTUSD",
            decode_kraken_trades,
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_sizes() {
        let btc = btcusd();
        assert_eq!(btc.primary.len(), 6);
        assert_eq!(btc.secondary_rebased.len(), 3);

        let sol = solusd();
        assert_eq!(sol.primary.len() + sol.secondary_rebased.len(), 9);

        let xau = xauusd();
        assert_eq!(xau.primary.len(), 3);
        assert_eq!(xau.secondary_native.len(), 3);
        assert_eq!(xau.secondary_rebased.len(), 2);

        let (eur, min) = eurusd();
        assert_eq!(eur.len(), 7);
        assert_eq!(min, 4);

        let (soleur, min) = soleur_direct();
        assert_eq!(soleur.len(), 3);
        assert_eq!(min, 2);
    }

    #[test]
    fn test_source_ids_unique_within_set() {
        let btc = btcusd();
        let mut ids: Vec<&str> = btc
            .primary
            .iter()
            .chain(btc.secondary_native.iter())
            .chain(btc.secondary_rebased.iter())
            .map(|f| f.source_id())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 9);
    }
}

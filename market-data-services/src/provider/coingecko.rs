//! CoinGecko public API (crypto).

use std::collections::HashMap;

use async_trait::async_trait;
use market_core::{AssetClass, Interval, MarketSeries, OhlcBar, Period, Quote, SymbolMatch};
use reqwest::Client;
use serde::Deserialize;
use urlencoding::encode;

use super::http::{build_client, get_json};
use super::{MarketDataProvider, ProviderRole};
use crate::crypto::coingecko_id;
use crate::error::MarketDataError;

const PROVIDER_ID: &str = "coingecko";
const BASE_URL: &str = "https://api.coingecko.com/api/v3";
/// `days` values accepted by the OHLC endpoint.
const OHLC_DAYS: &[u32] = &[1, 7, 14, 30, 90, 180, 365];

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
    last_updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Debug, Deserialize)]
struct SearchCoin {
    id: String,
    name: String,
    symbol: String,
}

pub struct CoinGeckoProvider {
    client: Client,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn resolve(symbol: &str) -> Result<&'static str, MarketDataError> {
        coingecko_id(symbol).ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest accepted `days` covering `period`.
fn ohlc_days(period: Period) -> String {
    if period == Period::Max {
        return "max".to_string();
    }
    let wanted = period.approx_days();
    OHLC_DAYS
        .iter()
        .find(|d| **d >= wanted)
        .map(|d| d.to_string())
        .unwrap_or_else(|| "max".to_string())
}

/// Rows are `[timestamp_ms, open, high, low, close]`; volume is not reported.
fn bars_from_ohlc(symbol: &str, rows: Vec<Vec<f64>>) -> Vec<OhlcBar> {
    rows.into_iter()
        .filter_map(|row| match row.as_slice() {
            [ts, open, high, low, close] => Some(OhlcBar {
                symbol: symbol.to_string(),
                timestamp: *ts as i64,
                open: *open,
                high: *high,
                low: *low,
                close: *close,
                volume: 0.0,
                source: PROVIDER_ID.to_string(),
            }),
            _ => None,
        })
        .collect()
}

fn quote_from_simple(symbol: &str, price: &SimplePrice) -> Option<Quote> {
    let usd = price.usd?;
    // Recover the previous price from the 24h percentage change.
    let previous = price
        .usd_24h_change
        .filter(|pct| pct.is_finite() && *pct > -100.0)
        .map(|pct| usd / (1.0 + pct / 100.0));
    let timestamp = price
        .last_updated_at
        .map(|secs| secs * 1000)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Some(Quote::from_previous_close(
        symbol.to_ascii_uppercase(),
        usd,
        previous,
        timestamp,
        PROVIDER_ID,
    ))
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Crypto
    }

    fn supports_symbol(&self, symbol: &str) -> bool {
        coingecko_id(symbol).is_some()
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let id = Self::resolve(symbol)?;
        let url = format!("{}/simple/price", BASE_URL);
        let prices: HashMap<String, SimplePrice> = get_json(
            &self.client,
            PROVIDER_ID,
            &url,
            &[
                ("ids", id),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_last_updated_at", "true"),
            ],
        )
        .await?;

        prices
            .get(id)
            .and_then(|p| quote_from_simple(symbol, p))
            .ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))
    }

    async fn historical(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<MarketSeries, MarketDataError> {
        let id = Self::resolve(symbol)?;
        let days = ohlc_days(period);
        tracing::debug!(
            "CoinGecko picks granularity from days={}, requested interval {} ignored",
            days,
            interval
        );

        let url = format!("{}/coins/{}/ohlc", BASE_URL, encode(id));
        let rows: Vec<Vec<f64>> = get_json(
            &self.client,
            PROVIDER_ID,
            &url,
            &[("vs_currency", "usd"), ("days", days.as_str())],
        )
        .await?;

        let (series, dropped) =
            MarketSeries::from_bars(symbol, PROVIDER_ID, bars_from_ohlc(symbol, rows));
        if dropped > 0 {
            tracing::debug!("CoinGecko: dropped {} invalid bars for {}", dropped, symbol);
        }
        Ok(series)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, MarketDataError> {
        let url = format!("{}/search", BASE_URL);
        let response: SearchResponse =
            get_json(&self.client, PROVIDER_ID, &url, &[("query", query)]).await?;

        Ok(response
            .coins
            .into_iter()
            .take(limit)
            .map(|coin| SymbolMatch {
                symbol: format!("{}-USD", coin.symbol.to_ascii_uppercase()),
                name: coin.name,
                exchange: Some(coin.id),
                asset_class: AssetClass::Crypto,
                source: PROVIDER_ID.to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ohlc_days_mapping() {
        assert_eq!(ohlc_days(Period::OneDay), "1");
        assert_eq!(ohlc_days(Period::FiveDays), "7");
        assert_eq!(ohlc_days(Period::SixMonths), "180");
        assert_eq!(ohlc_days(Period::TwoYears), "max");
        assert_eq!(ohlc_days(Period::Max), "max");
    }

    #[test]
    fn test_ohlc_rows() {
        let rows: Vec<Vec<f64>> =
            serde_json::from_str("[[1700000000000, 35000, 35500, 34800, 35200], [1, 2]]").unwrap();
        let bars = bars_from_ohlc("BTC-USD", rows);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, 1_700_000_000_000);
        assert_eq!(bars[0].volume, 0.0);
    }

    #[test]
    fn test_simple_price_quote() {
        let body = r#"{"bitcoin": {"usd": 110.0, "usd_24h_change": 10.0, "last_updated_at": 1700000000}}"#;
        let prices: HashMap<String, SimplePrice> = serde_json::from_str(body).unwrap();
        let quote = quote_from_simple("btc-usd", &prices["bitcoin"]).unwrap();
        assert_eq!(quote.symbol, "BTC-USD");
        assert!((quote.change - 10.0).abs() < 1e-9);
        assert!((quote.change_percent - 10.0).abs() < 1e-9);
        assert_eq!(quote.timestamp, 1_700_000_000_000);
    }
}

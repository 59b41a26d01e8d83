//! Alpha Vantage (equity-backup).
//!
//! Uses GLOBAL_QUOTE, TIME_SERIES_DAILY and SYMBOL_SEARCH. The free tier
//! allows 5 calls per minute and only daily bars.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use market_core::{AssetClass, Interval, MarketSeries, OhlcBar, Period, Quote, SymbolMatch};
use reqwest::Client;
use serde::Deserialize;

use super::http::{build_client, get_json, parse_number};
use super::{MarketDataProvider, ProviderRole};
use crate::crypto::is_crypto_symbol;
use crate::error::MarketDataError;

const PROVIDER_ID: &str = "alpha_vantage";
const BASE_URL: &str = "https://www.alphavantage.co/query";
/// TIME_SERIES_DAILY returns this many points unless `outputsize=full`.
const COMPACT_POINTS: u32 = 100;

/// Fields Alpha Vantage uses to signal problems inside a 200 response.
#[derive(Debug, Default, Deserialize)]
struct ApiNotice {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

impl ApiNotice {
    fn check(&self, symbol: &str) -> Result<(), MarketDataError> {
        if self.error_message.is_some() {
            return Err(MarketDataError::no_data(PROVIDER_ID, symbol));
        }
        // Note / Information are how the API reports throttling.
        if let Some(msg) = self.note.as_ref().or(self.information.as_ref()) {
            tracing::warn!("Alpha Vantage notice: {}", msg);
            return Err(MarketDataError::Status {
                provider: PROVIDER_ID.to_string(),
                status: 429,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<HashMap<String, String>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<HashMap<String, HashMap<String, String>>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<HashMap<String, String>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            api_key: api_key.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, MarketDataError> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("apikey", &self.api_key));
        get_json(&self.client, PROVIDER_ID, BASE_URL, &query).await
    }
}

fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(String::as_str)
}

fn quote_from_global(symbol: &str, raw: &HashMap<String, String>) -> Option<Quote> {
    let price = field(raw, "05. price").and_then(parse_number)?;
    let previous = field(raw, "08. previous close").and_then(parse_number);
    let timestamp = field(raw, "07. latest trading day")
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    Some(Quote::from_previous_close(
        field(raw, "01. symbol").unwrap_or(symbol),
        price,
        previous,
        timestamp,
        PROVIDER_ID,
    ))
}

fn bars_from_daily(
    symbol: &str,
    series: HashMap<String, HashMap<String, String>>,
    cutoff_ms: i64,
) -> Vec<OhlcBar> {
    series
        .into_iter()
        .filter_map(|(date, point)| {
            let timestamp = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?
                .and_utc()
                .timestamp_millis();
            if timestamp < cutoff_ms {
                return None;
            }
            Some(OhlcBar {
                symbol: symbol.to_string(),
                timestamp,
                open: field(&point, "1. open").and_then(parse_number)?,
                high: field(&point, "2. high").and_then(parse_number)?,
                low: field(&point, "3. low").and_then(parse_number)?,
                close: field(&point, "4. close").and_then(parse_number)?,
                volume: field(&point, "5. volume").and_then(parse_number).unwrap_or(0.0),
                source: PROVIDER_ID.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::EquityBackup
    }

    fn supports_symbol(&self, symbol: &str) -> bool {
        !is_crypto_symbol(symbol)
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let response: GlobalQuoteResponse = self
            .call(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol)])
            .await?;
        response.notice.check(symbol)?;

        response
            .quote
            .as_ref()
            .and_then(|raw| quote_from_global(symbol, raw))
            .ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))
    }

    async fn historical(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<MarketSeries, MarketDataError> {
        if interval != Interval::OneDay {
            return Err(MarketDataError::NotSupported {
                provider: PROVIDER_ID.to_string(),
                operation: "non-daily intervals",
            });
        }

        let days = period.approx_days();
        let output_size = if days > COMPACT_POINTS { "full" } else { "compact" };
        let response: DailySeriesResponse = self
            .call(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", output_size),
            ])
            .await?;
        response.notice.check(symbol)?;

        let series = response
            .series
            .ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))?;
        let cutoff = Utc::now().timestamp_millis() - i64::from(days) * 86_400_000;
        let bars = bars_from_daily(symbol, series, cutoff);

        let (series, dropped) = MarketSeries::from_bars(symbol, PROVIDER_ID, bars);
        if dropped > 0 {
            tracing::debug!("Alpha Vantage: dropped {} invalid bars for {}", dropped, symbol);
        }
        Ok(series)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, MarketDataError> {
        let response: SymbolSearchResponse = self
            .call(&[("function", "SYMBOL_SEARCH"), ("keywords", query)])
            .await?;
        response.notice.check(query)?;

        Ok(response
            .best_matches
            .iter()
            .filter_map(|m| {
                let symbol = field(m, "1. symbol")?.to_string();
                Some(SymbolMatch {
                    name: field(m, "2. name").unwrap_or(&symbol).to_string(),
                    exchange: field(m, "4. region").map(str::to_string),
                    asset_class: field(m, "3. type")
                        .map(AssetClass::from_label)
                        .unwrap_or(AssetClass::Other),
                    source: PROVIDER_ID.to_string(),
                    symbol,
                })
            })
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_quote_parsing() {
        let body = r#"{"Global Quote": {
            "01. symbol": "IBM",
            "05. price": "170.50",
            "07. latest trading day": "2024-03-01",
            "08. previous close": "168.00",
            "10. change percent": "1.4881%"
        }}"#;
        let response: GlobalQuoteResponse = serde_json::from_str(body).unwrap();
        assert!(response.notice.check("IBM").is_ok());

        let quote = quote_from_global("IBM", response.quote.as_ref().unwrap()).unwrap();
        assert_eq!(quote.price, 170.5);
        assert_eq!(quote.change, 2.5);
        assert_eq!(quote.source, "alpha_vantage");
    }

    #[test]
    fn test_throttle_note_is_retryable_status() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        let response: GlobalQuoteResponse = serde_json::from_str(body).unwrap();
        let err = response.notice.check("IBM").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_daily_series_respects_cutoff() {
        let body = r#"{"Time Series (Daily)": {
            "2024-03-01": {"1. open": "1", "2. high": "2", "3. low": "0.5", "4. close": "1.5", "5. volume": "10"},
            "2023-01-01": {"1. open": "1", "2. high": "2", "3. low": "0.5", "4. close": "1.5", "5. volume": "10"}
        }}"#;
        let response: DailySeriesResponse = serde_json::from_str(body).unwrap();
        let cutoff = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        let bars = bars_from_daily("IBM", response.series.unwrap(), cutoff);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.5);
    }
}

//! Yahoo Finance chart and search endpoints (equity-primary).

use async_trait::async_trait;
use market_core::{AssetClass, Interval, MarketSeries, OhlcBar, Period, Quote, SymbolMatch};
use reqwest::Client;
use serde::Deserialize;
use urlencoding::encode;

use super::http::{build_client, get_json};
use super::{MarketDataProvider, ProviderRole};
use crate::error::MarketDataError;

const PROVIDER_ID: &str = "yahoo";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<ChartIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuote {
    symbol: Option<String>,
    shortname: Option<String>,
    longname: Option<String>,
    exch_disp: Option<String>,
    exchange: Option<String>,
    quote_type: Option<String>,
}

pub struct YahooProvider {
    client: Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    async fn chart(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<ChartResult, MarketDataError> {
        let url = format!("{}/{}", CHART_URL, encode(symbol));
        let response: ChartResponse = get_json(
            &self.client,
            PROVIDER_ID,
            &url,
            &[("range", range), ("interval", interval)],
        )
        .await?;

        if let Some(err) = response.chart.error {
            tracing::debug!(
                "Yahoo chart error for {}: {} {}",
                symbol,
                err.code.unwrap_or_default(),
                err.description.unwrap_or_default()
            );
            return Err(MarketDataError::no_data(PROVIDER_ID, symbol));
        }

        response
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn bars_from_chart(symbol: &str, result: ChartResult) -> Vec<OhlcBar> {
    let quote = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let at = |series: &[Option<f64>]| series.get(i).copied().flatten();
            Some(OhlcBar {
                symbol: symbol.to_string(),
                timestamp: ts * 1000,
                open: at(&quote.open)?,
                high: at(&quote.high)?,
                low: at(&quote.low)?,
                close: at(&quote.close)?,
                volume: at(&quote.volume).unwrap_or(0.0),
                source: PROVIDER_ID.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::EquityPrimary
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let result = self.chart(symbol, "1d", "1d").await?;
        let meta = result.meta;

        let price = meta
            .regular_market_price
            .ok_or_else(|| MarketDataError::no_data(PROVIDER_ID, symbol))?;
        let timestamp = meta
            .regular_market_time
            .map(|secs| secs * 1000)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        Ok(Quote::from_previous_close(
            meta.symbol.unwrap_or_else(|| symbol.to_string()),
            price,
            meta.previous_close.or(meta.chart_previous_close),
            timestamp,
            PROVIDER_ID,
        ))
    }

    async fn historical(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<MarketSeries, MarketDataError> {
        let result = self.chart(symbol, period.as_str(), interval.as_str()).await?;
        let bars = bars_from_chart(symbol, result);

        let (series, dropped) = MarketSeries::from_bars(symbol, PROVIDER_ID, bars);
        if dropped > 0 {
            tracing::debug!("Yahoo: dropped {} invalid bars for {}", dropped, symbol);
        }
        Ok(series)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, MarketDataError> {
        let count = limit.to_string();
        let response: SearchResponse = get_json(
            &self.client,
            PROVIDER_ID,
            SEARCH_URL,
            &[("q", query), ("quotesCount", count.as_str()), ("newsCount", "0")],
        )
        .await?;

        Ok(response
            .quotes
            .into_iter()
            .filter_map(|q| {
                let symbol = q.symbol?;
                Some(SymbolMatch {
                    name: q.longname.or(q.shortname).unwrap_or_else(|| symbol.clone()),
                    symbol,
                    exchange: q.exch_disp.or(q.exchange),
                    asset_class: q
                        .quote_type
                        .as_deref()
                        .map(AssetClass::from_label)
                        .unwrap_or(AssetClass::Other),
                    source: PROVIDER_ID.to_string(),
                })
            })
            .take(limit)
            .collect())
    }
}

use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use market_core::{normalize_symbol, AnalysisDocument, AnalysisType, Interval, Period};
use market_data_services::NewAnalysis;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{no_data, parse_args, Tool, ToolContext};
use crate::error::ToolError;

pub const DEFAULT_OVERVIEW_SYMBOLS: [&str; 5] = ["^GSPC", "^DJI", "^IXIC", "BTC-USD", "ETH-USD"];
const MAX_OVERVIEW_SYMBOLS: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 10;

pub(crate) fn period_values() -> Vec<&'static str> {
    Period::ALL.iter().map(|p| p.as_str()).collect()
}

pub(crate) fn interval_values() -> Vec<&'static str> {
    Interval::ALL.iter().map(|i| i.as_str()).collect()
}

pub struct GetStockQuote;

#[derive(Deserialize)]
struct QuoteArgs {
    symbol: String,
}

#[async_trait]
impl Tool for GetStockQuote {
    fn name(&self) -> &'static str {
        "get_stock_quote"
    }

    fn description(&self) -> &'static str {
        "Get the latest price quote for a stock, index or crypto symbol"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Ticker symbol, e.g. AAPL, ^GSPC or BTC-USD"
                }
            },
            "required": ["symbol"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: QuoteArgs = parse_args(args)?;
        let symbol = normalize_symbol(&args.symbol)?;
        let started = Instant::now();

        let fetched = ctx.aggregator.get_quote(&symbol, &ctx.cancel).await;
        ctx.ensure_not_cancelled()?;
        let Some(quote) = fetched.data else {
            return Err(no_data(&symbol, &fetched.attempts));
        };
        let source = fetched.source.unwrap_or_else(|| quote.source.clone());

        ctx.record(NewAnalysis {
            symbol: symbol.clone(),
            input: json!({ "symbol": symbol }),
            output: AnalysisDocument::new(AnalysisType::Quote)
                .with_field("price", quote.price)
                .with_field("change", quote.change)
                .with_field("changePercent", quote.change_percent),
            confidence: None,
            source: source.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
        .await;

        Ok(json!({
            "symbol": symbol,
            "quote": quote,
            "source": source,
            "fromCache": fetched.from_cache,
        }))
    }
}

pub struct GetHistoricalData;

#[derive(Deserialize)]
struct HistoricalArgs {
    symbol: String,
    period: Option<String>,
    interval: Option<String>,
}

#[async_trait]
impl Tool for GetHistoricalData {
    fn name(&self) -> &'static str {
        "get_historical_data"
    }

    fn description(&self) -> &'static str {
        "Get historical OHLC bars for a symbol over a period at a given interval"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "minLength": 1},
                "period": {"type": "string", "enum": period_values(), "default": "1mo"},
                "interval": {"type": "string", "enum": interval_values(), "default": "1d"}
            },
            "required": ["symbol"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: HistoricalArgs = parse_args(args)?;
        let symbol = normalize_symbol(&args.symbol)?;
        let period: Period = args.period.as_deref().unwrap_or("1mo").parse()?;
        let interval: Interval = args.interval.as_deref().unwrap_or("1d").parse()?;
        let started = Instant::now();

        let fetched = ctx
            .aggregator
            .get_historical(&symbol, period, interval, &ctx.cancel)
            .await;
        ctx.ensure_not_cancelled()?;
        let Some(series) = fetched.data else {
            return Err(no_data(&symbol, &fetched.attempts));
        };
        let source = fetched.source.unwrap_or_else(|| series.source.clone());

        let mut doc = AnalysisDocument::new(AnalysisType::Historical)
            .with_field("bars", series.len() as u64)
            .with_field("period", period.as_str())
            .with_field("interval", interval.as_str());
        if let Some(last) = series.latest() {
            doc = doc.with_field("lastClose", last.close);
        }
        ctx.record(NewAnalysis {
            symbol: symbol.clone(),
            input: json!({ "symbol": symbol, "period": period, "interval": interval }),
            output: doc,
            confidence: None,
            source: source.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
        .await;

        Ok(json!({
            "symbol": symbol,
            "period": period,
            "interval": interval,
            "source": source,
            "fromCache": fetched.from_cache,
            "count": series.len(),
            "bars": series.bars,
        }))
    }
}

pub struct SearchSymbols;

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<usize>,
}

#[async_trait]
impl Tool for SearchSymbols {
    fn name(&self) -> &'static str {
        "search_symbols"
    }

    fn description(&self) -> &'static str {
        "Search for ticker symbols by company, index or coin name"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": DEFAULT_SEARCH_LIMIT}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        let query = args.query.trim().to_string();
        let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let fetched = ctx.aggregator.search(&query, limit, &ctx.cancel).await;
        ctx.ensure_not_cancelled()?;
        let Some(mut results) = fetched.data else {
            return Err(no_data(&format!("query '{}'", query), &fetched.attempts));
        };
        results.truncate(limit);

        Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results,
            "source": fetched.source,
            "fromCache": fetched.from_cache,
        }))
    }
}

pub struct GetMarketOverview;

#[derive(Deserialize)]
struct OverviewArgs {
    symbols: Option<Vec<String>>,
}

#[async_trait]
impl Tool for GetMarketOverview {
    fn name(&self) -> &'static str {
        "get_market_overview"
    }

    fn description(&self) -> &'static str {
        "Get quotes for a basket of major indices and crypto assets (or the given symbols)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbols": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Symbols to include; defaults to major indices plus BTC and ETH"
                }
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: OverviewArgs = parse_args(args)?;
        let requested: Vec<String> = match args.symbols {
            Some(list) if !list.is_empty() => list,
            _ => DEFAULT_OVERVIEW_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        };
        if requested.len() > MAX_OVERVIEW_SYMBOLS {
            return Err(ToolError::InvalidArguments(format!(
                "at most {} symbols per overview",
                MAX_OVERVIEW_SYMBOLS
            )));
        }
        let mut symbols = requested
            .iter()
            .map(|s| normalize_symbol(s))
            .collect::<Result<Vec<_>, _>>()?;
        symbols.dedup();
        let started = Instant::now();

        let lookups = symbols.iter().map(|symbol| async move {
            (symbol, ctx.aggregator.get_quote(symbol, &ctx.cancel).await)
        });
        let results = join_all(lookups).await;
        ctx.ensure_not_cancelled()?;

        let mut quotes = Vec::new();
        let mut unavailable = Vec::new();
        for (symbol, fetched) in results {
            match fetched.data {
                Some(quote) => quotes.push(quote),
                None => unavailable.push(json!({
                    "symbol": symbol,
                    "reason": super::describe_attempts(&fetched.attempts),
                })),
            }
        }

        if quotes.is_empty() {
            return Err(ToolError::NoData {
                subject: symbols.join(", "),
                detail: "every provider failed for every requested symbol".to_string(),
            });
        }

        ctx.record(NewAnalysis {
            symbol: "MARKET".to_string(),
            input: json!({ "symbols": symbols }),
            output: AnalysisDocument::new(AnalysisType::MarketOverview)
                .with_field("quotes", json!(quotes))
                .with_field("unavailable", unavailable.len() as u64),
            confidence: None,
            source: "aggregator".to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
        .await;

        Ok(json!({
            "quotes": quotes,
            "unavailable": unavailable,
            "asOf": chrono::Utc::now().timestamp_millis(),
        }))
    }
}

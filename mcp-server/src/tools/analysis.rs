use std::time::Instant;

use async_trait::async_trait;
use market_analysis::{analyze, Bias, IndicatorKind, ReportConfig, SignalSummary};
use market_core::{normalize_symbol, AnalysisDocument, AnalysisType, Interval, Period};
use market_data_services::{HistoryFilter, NewAnalysis};
use serde::Deserialize;
use serde_json::{json, Value};

use super::market::{interval_values, period_values};
use super::{no_data, parse_args, Tool, ToolContext};
use crate::error::ToolError;

const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct TechnicalAnalysis;

#[derive(Deserialize)]
struct TechnicalArgs {
    symbol: String,
    period: Option<String>,
    interval: Option<String>,
    indicators: Option<Vec<String>>,
}

/// Share of directional votes agreeing with the overall bias.
fn confidence(summary: &SignalSummary) -> Option<f64> {
    let votes = summary.bullish + summary.bearish + summary.neutral;
    if votes == 0 {
        return None;
    }
    let agreeing = match summary.bias {
        Bias::Bullish => summary.bullish,
        Bias::Bearish => summary.bearish,
        Bias::Neutral => summary.neutral.max(summary.bullish.min(summary.bearish)),
    };
    Some(f64::from(agreeing) / f64::from(votes))
}

#[async_trait]
impl Tool for TechnicalAnalysis {
    fn name(&self) -> &'static str {
        "technical_analysis"
    }

    fn description(&self) -> &'static str {
        "Run RSI, MACD, moving-average trend, support/resistance and ATR over recent price history"
    }

    fn input_schema(&self) -> Value {
        let indicators: Vec<&str> = IndicatorKind::ALL.iter().map(|k| k.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "minLength": 1},
                "period": {"type": "string", "enum": period_values(), "default": "6mo"},
                "interval": {"type": "string", "enum": interval_values(), "default": "1d"},
                "indicators": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": format!("Subset of: {}. Defaults to all.", indicators.join(", "))
                }
            },
            "required": ["symbol"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: TechnicalArgs = parse_args(args)?;
        let symbol = normalize_symbol(&args.symbol)?;
        let period: Period = args.period.as_deref().unwrap_or("6mo").parse()?;
        let interval: Interval = args.interval.as_deref().unwrap_or("1d").parse()?;

        let mut config = ReportConfig::default();
        if let Some(requested) = args.indicators.filter(|list| !list.is_empty()) {
            let mut kinds = Vec::new();
            for name in &requested {
                let kind: IndicatorKind = name.parse().map_err(ToolError::InvalidArguments)?;
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            config.indicators = kinds;
        }
        let started = Instant::now();

        let fetched = ctx
            .aggregator
            .get_historical(&symbol, period, interval, &ctx.cancel)
            .await;
        ctx.ensure_not_cancelled()?;
        let Some(series) = fetched.data else {
            return Err(no_data(&symbol, &fetched.attempts));
        };

        let report = analyze(&series, &config);
        let notes: Vec<String> = report
            .unavailable
            .iter()
            .map(|kind| {
                format!(
                    "{} unavailable: not enough valid data in {} bars",
                    kind.as_str(),
                    report.bars
                )
            })
            .collect();

        let mut body =
            serde_json::to_value(&report).map_err(|e| ToolError::Execution(e.to_string()))?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("period".to_string(), json!(period));
            obj.insert("interval".to_string(), json!(interval));
            obj.insert("fromCache".to_string(), json!(fetched.from_cache));
            obj.insert("notes".to_string(), json!(notes));
        }

        if let Some(price) = report.price {
            let indicators = json!({
                "rsi": report.rsi,
                "macd": report.macd,
                "movingAverages": report.moving_averages,
                "supportResistance": report.support_resistance,
                "atr": report.atr,
            });
            ctx.record(NewAnalysis {
                symbol: symbol.clone(),
                input: json!({
                    "symbol": symbol,
                    "period": period,
                    "interval": interval,
                    "indicators": config.indicators,
                }),
                output: AnalysisDocument::new(AnalysisType::Technical)
                    .with_field("price", price)
                    .with_field("indicators", indicators)
                    .with_field("summary", json!(report.summary)),
                confidence: confidence(&report.summary),
                source: report.source.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            })
            .await;
        }

        Ok(body)
    }
}

pub struct GetAnalysisHistory;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryArgs {
    symbol: Option<String>,
    analysis_type: Option<String>,
    limit: Option<usize>,
}

#[async_trait]
impl Tool for GetAnalysisHistory {
    fn name(&self) -> &'static str {
        "get_analysis_history"
    }

    fn description(&self) -> &'static str {
        "List previously stored analyses, newest first"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string"},
                "analysisType": {
                    "type": "string",
                    "enum": ["quote", "historical", "technical", "market_overview"]
                },
                "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": DEFAULT_HISTORY_LIMIT}
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: HistoryArgs = parse_args(args)?;
        let Some(store) = &ctx.store else {
            return Err(ToolError::Execution(
                "analysis history store is not configured".to_string(),
            ));
        };

        let analysis_type = match args.analysis_type.as_deref() {
            Some(raw) => Some(AnalysisType::parse(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!("unknown analysis type '{}'", raw))
            })?),
            None => None,
        };
        let symbol = args
            .symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(normalize_symbol)
            .transpose()?;

        let filter = HistoryFilter {
            symbol,
            analysis_type,
            limit: Some(args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
        };
        let records = store
            .analysis_history(&filter)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(json!({
            "count": records.len(),
            "records": records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_follows_bias() {
        let summary = SignalSummary {
            bullish: 3,
            bearish: 1,
            neutral: 0,
            bias: Bias::Bullish,
        };
        assert_eq!(confidence(&summary), Some(0.75));

        let none = SignalSummary {
            bullish: 0,
            bearish: 0,
            neutral: 0,
            bias: Bias::Neutral,
        };
        assert_eq!(confidence(&none), None);
    }
}

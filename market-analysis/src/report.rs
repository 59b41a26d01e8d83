//! Composite technical report over one market series.

use market_core::MarketSeries;
use serde::Serialize;
use std::str::FromStr;

use crate::indicators::{
    atr, macd, moving_average_trend, rsi, support_resistance, Atr, MaDirection, MaTrend, Macd,
    PricePosition, Rsi, RsiSignal, SupportResistance, Trend,
};

/// Indicators a report can include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Macd,
    MovingAverages,
    SupportResistance,
    Atr,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 5] = [
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::MovingAverages,
        IndicatorKind::SupportResistance,
        IndicatorKind::Atr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::MovingAverages => "moving_averages",
            IndicatorKind::SupportResistance => "support_resistance",
            IndicatorKind::Atr => "atr",
        }
    }
}

impl FromStr for IndicatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsi" => Ok(IndicatorKind::Rsi),
            "macd" => Ok(IndicatorKind::Macd),
            "sma" | "ma" | "moving_averages" => Ok(IndicatorKind::MovingAverages),
            "support_resistance" | "levels" => Ok(IndicatorKind::SupportResistance),
            "atr" => Ok(IndicatorKind::Atr),
            other => Err(format!("unknown indicator '{}'", other)),
        }
    }
}

/// Indicator parameters for [`analyze`].
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub indicators: Vec<IndicatorKind>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ma_short: usize,
    pub ma_long: usize,
    pub levels_lookback: usize,
    pub atr_period: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorKind::ALL.to_vec(),
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            ma_short: 20,
            ma_long: 50,
            levels_lookback: 20,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// Vote count across the directional indicators that produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalSummary {
    pub bullish: u32,
    pub bearish: u32,
    pub neutral: u32,
    pub bias: Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalReport {
    pub symbol: String,
    pub source: String,
    pub price: Option<f64>,
    pub bars: usize,
    pub rsi: Option<Rsi>,
    pub macd: Option<Macd>,
    pub moving_averages: Option<MaTrend>,
    pub support_resistance: Option<SupportResistance>,
    pub atr: Option<Atr>,
    /// Requested indicators the series was too short or sparse for.
    pub unavailable: Vec<IndicatorKind>,
    pub summary: SignalSummary,
}

/// Run the requested indicators over `series`.
///
/// Never fails: an indicator without enough data is left `None` and listed
/// in `unavailable`.
pub fn analyze(series: &MarketSeries, config: &ReportConfig) -> TechnicalReport {
    let closes = series.closes();
    let wants = |kind: IndicatorKind| config.indicators.contains(&kind);

    let rsi = wants(IndicatorKind::Rsi)
        .then(|| rsi(&closes, config.rsi_period))
        .flatten();
    let macd = wants(IndicatorKind::Macd)
        .then(|| macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal))
        .flatten();
    let moving_averages = wants(IndicatorKind::MovingAverages)
        .then(|| moving_average_trend(&closes, config.ma_short, config.ma_long))
        .flatten();
    let support_resistance = wants(IndicatorKind::SupportResistance)
        .then(|| support_resistance(&series.bars, config.levels_lookback))
        .flatten();
    let atr = wants(IndicatorKind::Atr)
        .then(|| atr(&series.bars, config.atr_period))
        .flatten();

    let mut unavailable = Vec::new();
    for kind in &config.indicators {
        let present = match kind {
            IndicatorKind::Rsi => rsi.is_some(),
            IndicatorKind::Macd => macd.is_some(),
            IndicatorKind::MovingAverages => moving_averages.is_some(),
            IndicatorKind::SupportResistance => support_resistance.is_some(),
            IndicatorKind::Atr => atr.is_some(),
        };
        if !present && !unavailable.contains(kind) {
            unavailable.push(*kind);
        }
    }

    if !unavailable.is_empty() {
        tracing::debug!(
            "Indicators unavailable for {} ({} bars): {:?}",
            series.symbol,
            series.len(),
            unavailable
        );
    }

    let summary = summarize(
        rsi.as_ref(),
        macd.as_ref(),
        moving_averages.as_ref(),
        support_resistance.as_ref(),
    );

    TechnicalReport {
        symbol: series.symbol.clone(),
        source: series.source.clone(),
        price: series.latest().map(|b| b.close),
        bars: series.len(),
        rsi,
        macd,
        moving_averages,
        support_resistance,
        atr,
        unavailable,
        summary,
    }
}

fn summarize(
    rsi: Option<&Rsi>,
    macd: Option<&Macd>,
    ma: Option<&MaTrend>,
    levels: Option<&SupportResistance>,
) -> SignalSummary {
    let mut votes: Vec<Trend> = Vec::new();

    if let Some(r) = rsi {
        votes.push(match r.signal {
            RsiSignal::Oversold => Trend::Bullish,
            RsiSignal::Overbought => Trend::Bearish,
            RsiSignal::Neutral => Trend::Neutral,
        });
    }
    if let Some(m) = macd {
        votes.push(m.trend);
    }
    if let Some(m) = ma {
        votes.push(match m.trend {
            MaDirection::Uptrend => Trend::Bullish,
            MaDirection::Downtrend => Trend::Bearish,
            MaDirection::Sideways => Trend::Neutral,
        });
    }
    if let Some(l) = levels {
        votes.push(match l.position {
            PricePosition::NearSupport | PricePosition::AboveResistance => Trend::Bullish,
            PricePosition::NearResistance | PricePosition::BelowSupport => Trend::Bearish,
            PricePosition::MidRange => Trend::Neutral,
        });
    }

    let count = |t: Trend| votes.iter().filter(|v| **v == t).count() as u32;
    let bullish = count(Trend::Bullish);
    let bearish = count(Trend::Bearish);
    let neutral = count(Trend::Neutral);

    let bias = match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Bias::Bullish,
        std::cmp::Ordering::Less => Bias::Bearish,
        std::cmp::Ordering::Equal => Bias::Neutral,
    };

    SignalSummary {
        bullish,
        bearish,
        neutral,
        bias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_kind_parsing() {
        assert_eq!("RSI".parse::<IndicatorKind>(), Ok(IndicatorKind::Rsi));
        assert_eq!("sma".parse::<IndicatorKind>(), Ok(IndicatorKind::MovingAverages));
        assert!("vwap".parse::<IndicatorKind>().is_err());
    }

    #[test]
    fn test_summary_bias() {
        let summary = summarize(None, None, None, None);
        assert_eq!(summary.bias, Bias::Neutral);
        assert_eq!(summary.bullish + summary.bearish + summary.neutral, 0);
    }
}

use market_core::OhlcBar;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Atr {
    pub period: usize,
    pub value: f64,
    /// ATR as a percentage of the last close.
    pub percent_of_price: f64,
}

/// True range of `bar` given the previous close.
fn true_range(bar: &OhlcBar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Average True Range: simple mean of the last `period` true ranges.
///
/// Needs `period + 1` bars since every true range looks at the prior close.
pub fn atr(bars: &[OhlcBar], period: usize) -> Option<Atr> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();
    let recent = &ranges[ranges.len() - period..];
    let value = recent.iter().sum::<f64>() / period as f64;
    if !value.is_finite() {
        return None;
    }

    let last_close = bars.last()?.close;
    let percent_of_price = if last_close > 0.0 {
        value / last_close * 100.0
    } else {
        0.0
    };

    Some(Atr {
        period,
        value,
        percent_of_price,
    })
}

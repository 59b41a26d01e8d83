//! Indicator Engine
//!
//! Pure functions over OHLC series. Nothing here performs I/O or keeps state
//! between calls. When the input is too short or too sparse for a result,
//! functions return an empty vector or `None`; callers treat that as
//! "indicator unavailable", never as an error.

pub mod levels;
pub mod momentum;
pub mod moving_average;
pub mod volatility;

use serde::Serialize;

pub use levels::{support_resistance, PricePosition, SupportResistance};
pub use momentum::{macd, rsi, Crossover, Macd, Rsi, RsiSignal};
pub use moving_average::{ema, moving_average_trend, sma, MaCross, MaDirection, MaTrend};
pub use volatility::{atr, Atr};

/// Direction read off an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

/// How decisively a signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
}

/// A close usable for computation: finite and strictly positive.
pub(crate) fn is_usable_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Drop closes that are non-finite or non-positive.
pub(crate) fn usable_prices(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| is_usable_price(*v)).collect()
}

/// Sign change of `prev -> cur` across zero.
pub(crate) fn zero_cross(prev: f64, cur: f64) -> Option<bool> {
    if prev <= 0.0 && cur > 0.0 {
        Some(true)
    } else if prev >= 0.0 && cur < 0.0 {
        Some(false)
    } else {
        None
    }
}

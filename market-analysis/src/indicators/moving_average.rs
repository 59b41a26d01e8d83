use serde::Serialize;

use super::{is_usable_price, usable_prices, zero_cross};

/// Share of a window that must hold usable closes for the window to count.
pub const SMA_MIN_VALID_RATIO: f64 = 0.8;

/// Simple moving average over every full window of `closes`.
///
/// Element `i` of the output covers `closes[i..i + period]`. Unusable closes
/// (non-finite or non-positive) inside a window are skipped and the average is
/// taken over the rest; a window left with fewer than
/// `floor(period * 0.8)` usable points yields `None`.
///
/// Returns an empty vector when `period` is zero or longer than the input.
pub fn sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || period > closes.len() {
        return Vec::new();
    }

    let min_valid = ((period as f64 * SMA_MIN_VALID_RATIO).floor() as usize).max(1);

    closes
        .windows(period)
        .map(|window| {
            let (sum, count) = window
                .iter()
                .filter(|v| is_usable_price(**v))
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

            if count >= min_valid {
                Some(sum / count as f64)
            } else {
                None
            }
        })
        .collect()
}

/// Exponential moving average seeded with the SMA of the first `period`
/// usable closes, then smoothed with multiplier `2 / (period + 1)`.
///
/// Unusable closes are filtered out before computation. The first output
/// value is the seed; the output has `n - period + 1` values for `n` usable
/// closes, or is empty when `n < period`.
pub fn ema(closes: &[f64], period: usize) -> Vec<f64> {
    ema_of(&usable_prices(closes), period)
}

/// EMA over values that may legitimately be zero or negative (MACD line).
/// Only non-finite values are dropped.
pub(crate) fn ema_of(values: &[f64], period: usize) -> Vec<f64> {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for value in &values[period..] {
        prev = (value - prev) * multiplier + prev;
        out.push(prev);
    }
    out
}

/// Golden/death cross between the short and long moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaCross {
    GoldenCross,
    DeathCross,
}

/// Price position relative to the short and long simple moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaDirection {
    Uptrend,
    Downtrend,
    Sideways,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaTrend {
    pub price: f64,
    pub short_period: usize,
    pub long_period: usize,
    pub short_sma: f64,
    pub long_sma: f64,
    pub trend: MaDirection,
    pub crossover: Option<MaCross>,
}

/// Trend from the short/long SMA stack.
///
/// Uptrend iff `price > short > long`, downtrend iff `price < short < long`,
/// otherwise sideways. A golden or death cross is reported when
/// `short - long` flips sign between the last two points where both averages
/// exist.
pub fn moving_average_trend(closes: &[f64], short: usize, long: usize) -> Option<MaTrend> {
    if short == 0 || short >= long || closes.len() < long {
        return None;
    }

    let price = *closes.iter().rev().find(|v| is_usable_price(**v))?;
    let short_series = sma(closes, short);
    let long_series = sma(closes, long);

    // Both series end on the last close; align from the back.
    let short_at = |back: usize| -> Option<f64> {
        short_series
            .len()
            .checked_sub(back + 1)
            .and_then(|i| short_series[i])
    };
    let long_at = |back: usize| -> Option<f64> {
        long_series
            .len()
            .checked_sub(back + 1)
            .and_then(|i| long_series[i])
    };

    let short_sma = short_at(0)?;
    let long_sma = long_at(0)?;

    let trend = if price > short_sma && short_sma > long_sma {
        MaDirection::Uptrend
    } else if price < short_sma && short_sma < long_sma {
        MaDirection::Downtrend
    } else {
        MaDirection::Sideways
    };

    let crossover = match (short_at(1), long_at(1)) {
        (Some(prev_short), Some(prev_long)) => {
            zero_cross(prev_short - prev_long, short_sma - long_sma).map(|up| {
                if up {
                    MaCross::GoldenCross
                } else {
                    MaCross::DeathCross
                }
            })
        }
        _ => None,
    };

    Some(MaTrend {
        price,
        short_period: short,
        long_period: long,
        short_sma,
        long_sma,
        trend,
        crossover,
    })
}

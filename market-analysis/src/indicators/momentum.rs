use serde::Serialize;

use super::moving_average::ema_of;
use super::{usable_prices, zero_cross, SignalStrength, Trend};

pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_STRONG_OVERBOUGHT: f64 = 80.0;
pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_STRONG_OVERSOLD: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiSignal {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rsi {
    pub period: usize,
    pub value: f64,
    pub signal: RsiSignal,
    pub strength: SignalStrength,
}

impl Rsi {
    fn classify(value: f64) -> (RsiSignal, SignalStrength) {
        if value > RSI_OVERBOUGHT {
            let strength = if value > RSI_STRONG_OVERBOUGHT {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (RsiSignal::Overbought, strength)
        } else if value < RSI_OVERSOLD {
            let strength = if value < RSI_STRONG_OVERSOLD {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (RsiSignal::Oversold, strength)
        } else {
            (RsiSignal::Neutral, SignalStrength::Weak)
        }
    }
}

/// Relative Strength Index with Wilder smoothing.
///
/// The first average gain/loss is the plain mean over the first `period`
/// close-to-close deltas; every later delta is folded in with
/// `avg = (avg * (period - 1) + value) / period`. An average loss of zero
/// gives RSI 100.
///
/// Needs at least `period + 1` usable closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<Rsi> {
    let closes = usable_prices(closes);
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |d: f64| d.max(0.0);
    let loss = |d: f64| (-d).max(0.0);

    let p = period as f64;
    let mut avg_gain = deltas[..period].iter().map(|d| gain(*d)).sum::<f64>() / p;
    let mut avg_loss = deltas[..period].iter().map(|d| loss(*d)).sum::<f64>() / p;

    for d in &deltas[period..] {
        avg_gain = (avg_gain * (p - 1.0) + gain(*d)) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss(*d)) / p;
    }

    let value = if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    let (signal, strength) = Rsi::classify(value);

    Some(Rsi {
        period,
        value,
        signal,
        strength,
    })
}

/// Direction of a MACD/signal line crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Crossover {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub crossover: Option<Crossover>,
    pub trend: Trend,
}

/// MACD line = EMA(fast) - EMA(slow), aligned on the shorter (slow) series;
/// signal = EMA(MACD line, signal); histogram = MACD - signal.
///
/// A crossover is reported when `MACD - signal` flips sign between the
/// previous and the current point. Trend is bullish when both MACD and the
/// histogram are positive, bearish when both are negative.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || signal == 0 {
        return None;
    }

    let closes = usable_prices(closes);
    let fast_ema = ema_of(&closes, fast);
    let slow_ema = ema_of(&closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // fast_ema starts (slow - fast) closes earlier than slow_ema.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_ema[i + offset] - slow_value)
        .collect();

    let signal_line = ema_of(&macd_line, signal);
    let signal_now = *signal_line.last()?;
    let macd_now = *macd_line.last()?;
    let histogram = macd_now - signal_now;

    let crossover = if signal_line.len() >= 2 {
        let macd_prev = macd_line[macd_line.len() - 2];
        let signal_prev = signal_line[signal_line.len() - 2];
        zero_cross(macd_prev - signal_prev, histogram).map(|up| {
            if up {
                Crossover::Bullish
            } else {
                Crossover::Bearish
            }
        })
    } else {
        None
    };

    let trend = if macd_now > 0.0 && histogram > 0.0 {
        Trend::Bullish
    } else if macd_now < 0.0 && histogram < 0.0 {
        Trend::Bearish
    } else {
        Trend::Neutral
    };

    Some(Macd {
        macd: macd_now,
        signal: signal_now,
        histogram,
        crossover,
        trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_monotonic_rise_is_strong_overbought() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let result = rsi(&closes, 14).unwrap();
        assert!(result.value > 80.0);
        assert_eq!(result.signal, RsiSignal::Overbought);
        assert_eq!(result.strength, SignalStrength::Strong);
    }

    #[test]
    fn test_rsi_monotonic_fall_is_strong_oversold() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let result = rsi(&closes, 14).unwrap();
        assert_eq!(result.value, 0.0);
        assert_eq!(result.signal, RsiSignal::Oversold);
        assert_eq!(result.strength, SignalStrength::Strong);
    }

    #[test]
    fn test_rsi_alternating_is_neutral() {
        let closes: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let result = rsi(&closes, 14).unwrap();
        assert!(result.value > 40.0 && result.value < 60.0);
        assert_eq!(result.signal, RsiSignal::Neutral);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&closes, 14).is_none());
    }

    #[test]
    fn test_rsi_classification_bounds() {
        assert_eq!(Rsi::classify(75.0), (RsiSignal::Overbought, SignalStrength::Moderate));
        assert_eq!(Rsi::classify(70.0), (RsiSignal::Neutral, SignalStrength::Weak));
        assert_eq!(Rsi::classify(25.0), (RsiSignal::Oversold, SignalStrength::Moderate));
        assert_eq!(Rsi::classify(19.9), (RsiSignal::Oversold, SignalStrength::Strong));
    }

    #[test]
    fn test_macd_uptrend_is_bullish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let result = macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd > 0.0);
        assert!(result.histogram > 0.0);
        assert_eq!(result.trend, Trend::Bullish);
        assert!((result.histogram - (result.macd - result.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_needs_slow_plus_signal() {
        let closes: Vec<f64> = (0..33).map(|i| 100.0 + i as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_none());
        let closes: Vec<f64> = (0..34).map(|i| 100.0 + i as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_some());
    }

    #[test]
    fn test_macd_bearish_crossover_on_reversal() {
        let mut closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..3).map(|i| 140.0 - 10.0 * i as f64));

        // Scan forward for the bar where the reversal flips the histogram.
        let crossed = (34..=closes.len())
            .filter_map(|n| macd(&closes[..n], 12, 26, 9))
            .any(|m| m.crossover == Some(Crossover::Bearish));
        assert!(crossed);
    }
}

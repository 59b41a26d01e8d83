use crate::error::ValidationError;
use crate::types::TimestampMS;
use serde::{Deserialize, Serialize};

/// One time-bucketed open/high/low/close/volume observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcBar {
    pub symbol: String,
    #[serde(rename = "timestampMs")]
    pub timestamp: TimestampMS,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub source: String,
}

impl OhlcBar {
    /// Check the bar invariants: prices finite and positive, volume finite and
    /// non-negative, and the high/low envelope containing open and close.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ValidationError::NonPositive { field, value });
            }
        }

        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(ValidationError::NegativeVolume(self.volume));
        }

        if self.high < self.low
            || self.high < self.open.max(self.close)
            || self.low > self.open.min(self.close)
        {
            return Err(ValidationError::InconsistentRange {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Ordered sequence of validated bars for one symbol.
///
/// Construction goes through [`MarketSeries::from_bars`], which drops any bar
/// that fails validation and sorts the rest by timestamp, so a series never
/// holds an invalid observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSeries {
    pub symbol: String,
    pub source: String,
    pub bars: Vec<OhlcBar>,
}

impl MarketSeries {
    /// Build a series from raw provider bars. Returns the series and the
    /// number of bars that were dropped as invalid.
    pub fn from_bars(
        symbol: impl Into<String>,
        source: impl Into<String>,
        bars: Vec<OhlcBar>,
    ) -> (Self, usize) {
        let symbol = symbol.into();
        let total = bars.len();

        let mut valid: Vec<OhlcBar> = bars
            .into_iter()
            .filter(|bar| match bar.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Dropping invalid bar for {} at {}: {}", symbol, bar.timestamp, e);
                    false
                }
            })
            .collect();
        valid.sort_by_key(|bar| bar.timestamp);
        valid.dedup_by_key(|bar| bar.timestamp);

        let dropped = total - valid.len();
        (
            Self {
                symbol,
                source: source.into(),
                bars: valid,
            },
            dropped,
        )
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn latest(&self) -> Option<&OhlcBar> {
        self.bars.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> OhlcBar {
        OhlcBar {
            symbol: "AAPL".to_string(),
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_valid_bar() {
        assert!(bar(1, 10.0, 12.0, 9.0, 11.0, 100.0).is_valid());
        assert!(bar(1, 10.0, 10.0, 10.0, 10.0, 0.0).is_valid());
    }

    #[test]
    fn test_invalid_bars_rejected() {
        // high below close
        assert!(!bar(1, 10.0, 10.5, 9.0, 11.0, 1.0).is_valid());
        // low above open
        assert!(!bar(1, 10.0, 12.0, 10.5, 11.0, 1.0).is_valid());
        // non-finite
        assert!(!bar(1, f64::NAN, 12.0, 9.0, 11.0, 1.0).is_valid());
        // non-positive price
        assert!(!bar(1, 0.0, 12.0, 9.0, 11.0, 1.0).is_valid());
        // negative volume
        assert_eq!(
            bar(1, 10.0, 12.0, 9.0, 11.0, -1.0).validate(),
            Err(ValidationError::NegativeVolume(-1.0))
        );
    }

    #[test]
    fn test_series_drops_invalid_and_sorts() {
        let bars = vec![
            bar(3, 10.0, 12.0, 9.0, 11.0, 1.0),
            bar(1, 10.0, 12.0, 9.0, 11.0, 1.0),
            bar(2, 10.0, 9.0, 12.0, 11.0, 1.0), // high < low
            bar(4, f64::INFINITY, 12.0, 9.0, 11.0, 1.0),
        ];

        let (series, dropped) = MarketSeries::from_bars("AAPL", "test", bars);
        assert_eq!(dropped, 2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[0].timestamp, 1);
        assert_eq!(series.latest().map(|b| b.timestamp), Some(3));
        assert!(series.bars.iter().all(OhlcBar::is_valid));
    }
}

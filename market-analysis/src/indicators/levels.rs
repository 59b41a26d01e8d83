use market_core::OhlcBar;
use serde::Serialize;

/// Candidate extremes considered on each side before de-duplication.
const CANDIDATES: usize = 5;
/// Levels kept on each side.
const MAX_LEVELS: usize = 3;
/// Levels closer than this relative distance collapse into one.
const DEDUP_TOLERANCE: f64 = 0.002;
/// Price within this relative distance of a level counts as "near" it.
const NEAR_LEVEL: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePosition {
    NearResistance,
    NearSupport,
    AboveResistance,
    BelowSupport,
    MidRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportResistance {
    pub lookback: usize,
    pub price: f64,
    /// Highest first.
    pub resistance: Vec<f64>,
    /// Lowest first.
    pub support: Vec<f64>,
    pub position: PricePosition,
}

fn dedup_levels(sorted: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut kept: Vec<f64> = Vec::with_capacity(MAX_LEVELS);
    for level in sorted {
        if kept.len() == MAX_LEVELS {
            break;
        }
        if kept
            .iter()
            .all(|k| ((level - k) / k).abs() > DEDUP_TOLERANCE)
        {
            kept.push(level);
        }
    }
    kept
}

/// Support and resistance from the extremes of the last `lookback` bars.
///
/// The five highest highs and five lowest lows are collapsed when within
/// 0.2% of an already kept level, then capped to three per side. The last
/// close is classified against the nearest levels.
pub fn support_resistance(bars: &[OhlcBar], lookback: usize) -> Option<SupportResistance> {
    if lookback < 2 || bars.len() < 2 {
        return None;
    }

    let window = &bars[bars.len().saturating_sub(lookback)..];
    let price = window.last()?.close;

    let mut highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    highs.sort_by(|a, b| b.total_cmp(a));
    let resistance = dedup_levels(highs.into_iter().take(CANDIDATES));

    let mut lows: Vec<f64> = window.iter().map(|b| b.low).collect();
    lows.sort_by(|a, b| a.total_cmp(b));
    let support = dedup_levels(lows.into_iter().take(CANDIDATES));

    let position = classify(price, &resistance, &support);

    Some(SupportResistance {
        lookback: window.len(),
        price,
        resistance,
        support,
        position,
    })
}

fn classify(price: f64, resistance: &[f64], support: &[f64]) -> PricePosition {
    let top = resistance.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bottom = support.iter().copied().fold(f64::INFINITY, f64::min);

    if price > top {
        return PricePosition::AboveResistance;
    }
    if price < bottom {
        return PricePosition::BelowSupport;
    }

    let nearest_resistance = resistance
        .iter()
        .copied()
        .filter(|r| *r >= price)
        .fold(f64::INFINITY, f64::min);
    let nearest_support = support
        .iter()
        .copied()
        .filter(|s| *s <= price)
        .fold(f64::NEG_INFINITY, f64::max);

    let to_resistance = (nearest_resistance - price) / price;
    let to_support = (price - nearest_support) / price;

    if to_resistance <= NEAR_LEVEL && to_resistance <= to_support {
        PricePosition::NearResistance
    } else if to_support <= NEAR_LEVEL {
        PricePosition::NearSupport
    } else {
        PricePosition::MidRange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> OhlcBar {
        OhlcBar {
            symbol: "TEST".to_string(),
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_levels_are_deduplicated_and_capped() {
        let bars = vec![
            bar(110.0, 90.0, 100.0),
            bar(110.1, 90.1, 100.0), // within 0.2% of 110 / 90
            bar(108.0, 92.0, 100.0),
            bar(106.0, 94.0, 100.0),
            bar(104.0, 95.0, 100.0),
            bar(102.0, 96.0, 100.0),
        ];

        let sr = support_resistance(&bars, 20).unwrap();
        assert_eq!(sr.resistance, vec![110.1, 108.0, 106.0]);
        assert_eq!(sr.support, vec![90.0, 92.0, 94.0]);
        assert_eq!(sr.lookback, 6);
        assert_eq!(sr.position, PricePosition::MidRange);
    }

    #[test]
    fn test_near_resistance() {
        let bars = vec![bar(100.0, 80.0, 90.0), bar(100.5, 95.0, 100.0)];
        let sr = support_resistance(&bars, 20).unwrap();
        assert_eq!(sr.position, PricePosition::NearResistance);
    }

    #[test]
    fn test_near_support() {
        let bars = vec![bar(120.0, 90.0, 110.0), bar(100.0, 90.0, 90.5)];
        let sr = support_resistance(&bars, 20).unwrap();
        assert_eq!(sr.position, PricePosition::NearSupport);
    }

    #[test]
    fn test_lookback_limits_window() {
        let mut bars = vec![bar(500.0, 1.0, 250.0)];
        bars.extend((0..5).map(|_| bar(101.0, 99.0, 100.0)));
        let sr = support_resistance(&bars, 5).unwrap();
        assert_eq!(sr.resistance, vec![101.0]);
        assert_eq!(sr.support, vec![99.0]);
    }

    #[test]
    fn test_insufficient_bars() {
        assert!(support_resistance(&[bar(1.0, 1.0, 1.0)], 20).is_none());
    }
}

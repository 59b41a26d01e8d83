use chrono::{Duration, TimeZone, Utc};
use market_analysis::{
    analyze, Bias, IndicatorKind, MaDirection, PricePosition, ReportConfig, RsiSignal, Trend,
};
use market_core::{MarketSeries, OhlcBar};

fn daily_series(closes: &[f64]) -> MarketSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, close)| OhlcBar {
            symbol: "AAPL".to_string(),
            timestamp: (start + Duration::days(i as i64)).timestamp_millis(),
            open: close * 0.998,
            high: close * 1.005,
            low: close * 0.995,
            close: *close,
            volume: 1_000_000.0,
            source: "test".to_string(),
        })
        .collect();

    let (series, dropped) = MarketSeries::from_bars("AAPL", "test", bars);
    assert_eq!(dropped, 0);
    series
}

#[test]
fn test_full_report_on_steady_uptrend() {
    let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
    let series = daily_series(&closes);

    let report = analyze(&series, &ReportConfig::default());

    assert_eq!(report.bars, 60);
    assert_eq!(report.price, closes.last().copied());
    assert!(report.unavailable.is_empty());

    let rsi = report.rsi.as_ref().unwrap();
    assert_eq!(rsi.value, 100.0);
    assert_eq!(rsi.signal, RsiSignal::Overbought);

    assert_eq!(report.macd.as_ref().unwrap().trend, Trend::Bullish);
    assert_eq!(
        report.moving_averages.as_ref().unwrap().trend,
        MaDirection::Uptrend
    );
    assert_eq!(
        report.support_resistance.as_ref().unwrap().position,
        PricePosition::NearResistance
    );
    assert!(report.atr.as_ref().unwrap().value > 0.0);

    // MACD and MA vote bullish, overbought RSI and nearby resistance vote bearish.
    assert_eq!(report.summary.bullish, 2);
    assert_eq!(report.summary.bearish, 2);
    assert_eq!(report.summary.bias, Bias::Neutral);
}

#[test]
fn test_short_series_marks_indicators_unavailable() {
    let closes: Vec<f64> = (0..10).map(|i| 50.0 + i as f64).collect();
    let series = daily_series(&closes);

    let report = analyze(&series, &ReportConfig::default());

    assert!(report.rsi.is_none());
    assert!(report.macd.is_none());
    assert!(report.moving_averages.is_none());
    assert!(report.atr.is_none());
    assert!(report.support_resistance.is_some());
    assert_eq!(
        report.unavailable,
        vec![
            IndicatorKind::Rsi,
            IndicatorKind::Macd,
            IndicatorKind::MovingAverages,
            IndicatorKind::Atr,
        ]
    );
}

#[test]
fn test_only_requested_indicators_run() {
    let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 5) as f64).collect();
    let series = daily_series(&closes);

    let config = ReportConfig {
        indicators: vec![IndicatorKind::Rsi],
        ..ReportConfig::default()
    };
    let report = analyze(&series, &config);

    assert!(report.rsi.is_some());
    assert!(report.macd.is_none());
    assert!(report.atr.is_none());
    assert!(report.unavailable.is_empty());
}

#[test]
fn test_report_serializes_camel_case() {
    let closes: Vec<f64> = (0..30).map(|i| 20.0 + i as f64 * 0.1).collect();
    let report = analyze(&daily_series(&closes), &ReportConfig::default());

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("supportResistance").is_some());
    assert!(json.get("movingAverages").is_some());
    assert_eq!(json["unavailable"][0], "macd");
}

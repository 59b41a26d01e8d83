pub mod indicators;
pub mod report;

// Re-export commonly used items from indicators module
pub use indicators::{
    atr, ema, macd, moving_average_trend, rsi, sma, support_resistance, Atr, Crossover, Macd,
    MaCross, MaDirection, MaTrend, PricePosition, Rsi, RsiSignal, SignalStrength, SupportResistance, Trend,
};

// Re-export commonly used items from report module
pub use report::{analyze, Bias, IndicatorKind, ReportConfig, SignalSummary, TechnicalReport};

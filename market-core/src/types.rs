pub mod analysis;
pub mod ohlc;
pub mod quote;
pub mod symbol;

// Re-export common types
pub use analysis::{AnalysisDocument, AnalysisType};
pub use ohlc::{MarketSeries, OhlcBar};
pub use quote::Quote;
pub use symbol::{normalize_symbol, AssetClass, Interval, Period, SymbolMatch};

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMS = i64;

pub mod error;
pub mod types;

// Re-export common types
pub use error::ValidationError;
pub use types::{
    normalize_symbol, AnalysisDocument, AnalysisType, AssetClass, Interval, MarketSeries,
    OhlcBar, Period, Quote, SymbolMatch, TimestampMS,
};

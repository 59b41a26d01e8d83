//! Upstream market-data provider clients.
//!
//! Every client maps its wire format into `market-core` types; nothing
//! provider-specific leaks past this module.

mod alpha_vantage;
mod coingecko;
mod http;
mod yahoo;

pub use alpha_vantage::AlphaVantageProvider;
pub use coingecko::CoinGeckoProvider;
pub use yahoo::YahooProvider;

use async_trait::async_trait;
use market_core::{Interval, MarketSeries, Period, Quote, SymbolMatch};
use serde::Serialize;

use crate::error::MarketDataError;

/// Slot a provider fills in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    EquityPrimary,
    EquityBackup,
    Crypto,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable identifier used in results, logs and cache metadata.
    fn id(&self) -> &'static str;

    fn role(&self) -> ProviderRole;

    /// Cheap, offline check whether this provider can serve `symbol` at all.
    /// Unsupported symbols are skipped without consuming a rate-limit slot.
    fn supports_symbol(&self, _symbol: &str) -> bool {
        true
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;

    async fn historical(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<MarketSeries, MarketDataError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>, MarketDataError>;
}

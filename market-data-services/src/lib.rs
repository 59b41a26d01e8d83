pub mod aggregator;
pub mod cache;
pub mod circuit_breaker;
pub mod crypto;
pub mod error;
pub mod events;
pub mod provider;
pub mod provider_state;
pub mod rate_limiter;
pub mod retry;
pub mod store;

// Re-export commonly used items
pub use aggregator::{
    Aggregator, AggregatorConfig, AttemptOutcome, CacheTtl, Fetched, ProviderAttempt,
    ProviderLimits,
};
pub use cache::{CacheCategory, CacheEntry, CacheStore, MemoryCacheStore};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{CacheError, MarketDataError, StoreError};
pub use events::{event_channel, spawn_event_logger, EventSender, ProviderEvent};
pub use provider::{MarketDataProvider, ProviderRole};
pub use provider_state::{Admission, ProviderState, ProviderStatus};
pub use retry::RetryPolicy;
pub use store::{AnalysisRecord, AnalysisStore, HistoryFilter, InMemoryAnalysisStore, NewAnalysis};

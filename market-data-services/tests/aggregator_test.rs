use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use market_core::{Interval, MarketSeries, OhlcBar, Period, Quote, SymbolMatch};
use market_data_services::{
    Aggregator, AggregatorConfig, AttemptOutcome, CacheCategory, CacheEntry, CacheError,
    CacheStore, CircuitState, MarketDataError, MarketDataProvider, MemoryCacheStore, ProviderLimits,
    ProviderRole, RetryPolicy,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Behavior {
    Healthy(f64),
    Failing,
    /// Upstream answers 404, as Yahoo does for an unknown ticker.
    NotFound,
    Empty,
}

struct FakeProvider {
    id: &'static str,
    role: ProviderRole,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn new(id: &'static str, role: ProviderRole, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            role,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome<T>(&self, healthy: impl FnOnce(f64) -> T, empty: T) -> Result<T, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Healthy(price) => Ok(healthy(price)),
            Behavior::Empty => Ok(empty),
            Behavior::Failing => Err(MarketDataError::Status {
                provider: self.id.to_string(),
                status: 503,
            }),
            Behavior::NotFound => Err(MarketDataError::Status {
                provider: self.id.to_string(),
                status: 404,
            }),
        }
    }
}

#[async_trait]
impl MarketDataProvider for FakeProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    fn role(&self) -> ProviderRole {
        self.role
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let invalid = Quote::from_previous_close(symbol, 0.0, None, 0, self.id);
        self.outcome(
            |price| Quote::from_previous_close(symbol, price, Some(price - 1.0), 1_700_000_000_000, self.id),
            invalid,
        )
    }

    async fn historical(
        &self,
        symbol: &str,
        _period: Period,
        _interval: Interval,
    ) -> Result<MarketSeries, MarketDataError> {
        let empty = MarketSeries::from_bars(symbol, self.id, Vec::new()).0;
        self.outcome(
            |price| {
                let bars = (0..5)
                    .map(|i| OhlcBar {
                        symbol: symbol.to_string(),
                        timestamp: 1_700_000_000_000 + i * 86_400_000,
                        open: price,
                        high: price + 1.0,
                        low: price - 1.0,
                        close: price,
                        volume: 100.0,
                        source: self.id.to_string(),
                    })
                    .collect();
                MarketSeries::from_bars(symbol, self.id, bars).0
            },
            empty,
        )
    }

    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SymbolMatch>, MarketDataError> {
        self.outcome(
            |_| {
                vec![SymbolMatch {
                    symbol: query.to_ascii_uppercase(),
                    name: query.to_string(),
                    exchange: None,
                    asset_class: market_core::AssetClass::Equity,
                    source: self.id.to_string(),
                }]
            },
            Vec::new(),
        )
    }
}

/// Cache backend that is always down.
struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _: CacheCategory, _: &str) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn set(&self, _: CacheCategory, _: &str, _: Value, _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn delete(&self, _: CacheCategory, _: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }
}

fn fast_config() -> AggregatorConfig {
    AggregatorConfig {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(200),
            ..RetryPolicy::default()
        },
        ..AggregatorConfig::default()
    }
}

struct Fixture {
    primary: Arc<FakeProvider>,
    backup: Arc<FakeProvider>,
    crypto: Arc<FakeProvider>,
    aggregator: Aggregator,
}

fn fixture(config: AggregatorConfig, primary: Behavior, backup: Behavior, crypto: Behavior) -> Fixture {
    let primary = FakeProvider::new("fake_primary", ProviderRole::EquityPrimary, primary);
    let backup = FakeProvider::new("fake_backup", ProviderRole::EquityBackup, backup);
    let crypto = FakeProvider::new("fake_crypto", ProviderRole::Crypto, crypto);

    let providers: Vec<Arc<dyn MarketDataProvider>> =
        vec![primary.clone(), backup.clone(), crypto.clone()];
    let aggregator = Aggregator::new(config, providers);

    Fixture {
        primary,
        backup,
        crypto,
        aggregator,
    }
}

#[tokio::test]
async fn test_crypto_symbol_routes_to_crypto_provider_first() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(100.0),
        Behavior::Healthy(101.0),
        Behavior::Healthy(35_000.0),
    );

    let result = f.aggregator.get_quote("BTC-USD", &CancellationToken::new()).await;

    assert_eq!(result.source.as_deref(), Some("fake_crypto"));
    assert_eq!(result.data.unwrap().price, 35_000.0);
    assert_eq!(f.crypto.calls(), 1);
    assert_eq!(f.primary.calls(), 0);
    assert_eq!(f.backup.calls(), 0);
}

#[tokio::test]
async fn test_equity_quote_is_cached_with_identical_payload() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(190.25),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
    );
    let aggregator = f.aggregator.with_cache(Arc::new(MemoryCacheStore::new()));
    let cancel = CancellationToken::new();

    let first = aggregator.get_quote("AAPL", &cancel).await;
    assert_eq!(first.source.as_deref(), Some("fake_primary"));
    assert!(!first.from_cache);

    let second = aggregator.get_quote("aapl", &cancel).await;
    assert!(second.from_cache);
    assert_eq!(second.source.as_deref(), Some("fake_primary"));
    assert_eq!(second.data, first.data);
    assert!(second.attempts.is_empty());

    assert_eq!(f.primary.calls(), 1);
}

#[tokio::test]
async fn test_historical_cache_key_includes_period_and_interval() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(50.0),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
    );
    let aggregator = f.aggregator.with_cache(Arc::new(MemoryCacheStore::new()));
    let cancel = CancellationToken::new();

    let a = aggregator
        .get_historical("MSFT", Period::OneMonth, Interval::OneDay, &cancel)
        .await;
    let b = aggregator
        .get_historical("MSFT", Period::OneYear, Interval::OneDay, &cancel)
        .await;
    let c = aggregator
        .get_historical("MSFT", Period::OneMonth, Interval::OneDay, &cancel)
        .await;

    assert!(!a.from_cache);
    assert!(!b.from_cache);
    assert!(c.from_cache);
    assert_eq!(c.data.unwrap().len(), 5);
    assert_eq!(f.primary.calls(), 2);
}

#[tokio::test]
async fn test_breaker_opens_after_three_exhausted_calls() {
    let f = fixture(
        fast_config(),
        Behavior::Failing,
        Behavior::Healthy(10.0),
        Behavior::Healthy(1.0),
    );
    let cancel = CancellationToken::new();

    // Each call burns 1 + 2 retries against the primary but counts once.
    for _ in 0..3 {
        let result = f.aggregator.get_quote("IBM", &cancel).await;
        assert_eq!(result.source.as_deref(), Some("fake_backup"));
    }
    assert_eq!(f.primary.calls(), 9);

    let status = &f.aggregator.provider_status()[0];
    assert_eq!(status.circuit.as_deref(), Some("open"));

    // Open circuit: no further network attempts against the primary.
    let result = f.aggregator.get_quote("IBM", &cancel).await;
    assert_eq!(result.source.as_deref(), Some("fake_backup"));
    assert_eq!(f.primary.calls(), 9);
    assert_eq!(
        result.attempts[0].outcome,
        AttemptOutcome::CircuitOpen
    );
    assert_eq!(result.attempts[0].provider, "fake_primary");
}

#[tokio::test]
async fn test_breaker_does_not_open_below_threshold() {
    let f = fixture(
        fast_config(),
        Behavior::Failing,
        Behavior::Healthy(10.0),
        Behavior::Healthy(1.0),
    );
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        f.aggregator.get_quote("IBM", &cancel).await;
    }
    let status = &f.aggregator.provider_status()[0];
    assert_eq!(status.circuit.as_deref(), Some(CircuitState::Closed.to_string().as_str()));
    assert_eq!(status.consecutive_failures, 2);
}

#[tokio::test]
async fn test_unknown_symbols_do_not_open_breaker() {
    let f = fixture(
        fast_config(),
        Behavior::NotFound,
        Behavior::Healthy(10.0),
        Behavior::Healthy(1.0),
    );
    let cancel = CancellationToken::new();

    for symbol in ["AAPLL", "MSFTT", "GOOGG", "AMZNN"] {
        let result = f.aggregator.get_quote(symbol, &cancel).await;
        assert_eq!(result.source.as_deref(), Some("fake_backup"));
        assert!(matches!(result.attempts[0].outcome, AttemptOutcome::Failed { .. }));
    }

    // 404 is neither retried nor counted against the breaker.
    assert_eq!(f.primary.calls(), 4);
    let status = &f.aggregator.provider_status()[0];
    assert_eq!(status.circuit.as_deref(), Some("closed"));
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn test_rate_limited_provider_is_skipped_and_reported() {
    let config = AggregatorConfig {
        limits: ProviderLimits {
            equity_primary: 2,
            ..ProviderLimits::default()
        },
        ..fast_config()
    };
    let f = fixture(
        config,
        Behavior::Healthy(10.0),
        Behavior::Healthy(11.0),
        Behavior::Healthy(1.0),
    );
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let result = f.aggregator.get_quote("IBM", &cancel).await;
        assert_eq!(result.source.as_deref(), Some("fake_primary"));
    }

    let third = f.aggregator.get_quote("IBM", &cancel).await;
    assert_eq!(third.source.as_deref(), Some("fake_backup"));
    assert_eq!(third.attempts[0].outcome, AttemptOutcome::RateLimited);
    assert_eq!(f.primary.calls(), 2);
}

#[tokio::test]
async fn test_all_providers_failing_returns_no_data() {
    let f = fixture(
        fast_config(),
        Behavior::Failing,
        Behavior::Failing,
        Behavior::Failing,
    );

    let result = f.aggregator.get_quote("IBM", &CancellationToken::new()).await;

    assert!(result.data.is_none());
    assert!(result.source.is_none());
    assert!(!result.from_cache);
    assert_eq!(result.attempts.len(), 3);
    assert!(result
        .attempts
        .iter()
        .all(|a| matches!(a.outcome, AttemptOutcome::Failed { .. })));
}

#[tokio::test]
async fn test_empty_result_falls_through() {
    let f = fixture(
        fast_config(),
        Behavior::Empty,
        Behavior::Healthy(42.0),
        Behavior::Healthy(1.0),
    );

    let result = f
        .aggregator
        .get_historical("IBM", Period::OneMonth, Interval::OneDay, &CancellationToken::new())
        .await;

    assert_eq!(result.source.as_deref(), Some("fake_backup"));
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Empty);
    // A provider answering with nothing is not a health failure.
    assert_eq!(f.aggregator.provider_status()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_cancelled_request_makes_no_calls() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = f.aggregator.get_quote("IBM", &cancel).await;

    assert!(result.data.is_none());
    assert_eq!(f.primary.calls() + f.backup.calls() + f.crypto.calls(), 0);
}

#[tokio::test]
async fn test_cache_outage_is_not_fatal() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(77.0),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
    );
    let aggregator = f.aggregator.with_cache(Arc::new(BrokenCache));
    let cancel = CancellationToken::new();

    let first = aggregator.get_quote("IBM", &cancel).await;
    let second = aggregator.get_quote("IBM", &cancel).await;

    assert_eq!(first.data.unwrap().price, 77.0);
    assert!(!second.from_cache);
    assert_eq!(f.primary.calls(), 2);
}

#[tokio::test]
async fn test_search_uses_equity_order() {
    let f = fixture(
        fast_config(),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
        Behavior::Healthy(1.0),
    );

    let result = f.aggregator.search("apple", 5, &CancellationToken::new()).await;

    assert_eq!(result.source.as_deref(), Some("fake_primary"));
    assert_eq!(result.data.unwrap()[0].symbol, "APPLE");
}

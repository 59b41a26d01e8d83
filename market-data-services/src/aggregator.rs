//! Resilient multi-source aggregator.
//!
//! Every lookup runs the same pipeline:
//!
//! 1. cache-aside read keyed by `(category, SYMBOL[:period:interval])`
//! 2. provider order: crypto first for crypto-looking symbols, otherwise
//!    equity-primary first
//! 3. per provider: circuit breaker and rate limiter admission, then a
//!    bounded retry loop with per-attempt deadline
//! 4. the first usable result is cached and returned
//!
//! Running out of providers is a normal outcome: `data` is `None`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use market_core::{Interval, MarketSeries, Period, Quote, SymbolMatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::{cache_key, CacheCategory, CacheStore};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::crypto::is_crypto_symbol;
use crate::error::MarketDataError;
use crate::events::{EventSender, ProviderEvent};
use crate::provider::{
    AlphaVantageProvider, CoinGeckoProvider, MarketDataProvider, ProviderRole, YahooProvider,
};
use crate::provider_state::{ProviderState, ProviderStatus};
use crate::rate_limiter::DEFAULT_WINDOW;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Requests per rate-limit window for each provider role.
#[derive(Debug, Clone)]
pub struct ProviderLimits {
    pub equity_primary: u32,
    pub equity_backup: u32,
    pub crypto: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            equity_primary: 100,
            equity_backup: 5,
            crypto: 30,
        }
    }
}

impl ProviderLimits {
    pub fn for_role(&self, role: ProviderRole) -> u32 {
        match role {
            ProviderRole::EquityPrimary => self.equity_primary,
            ProviderRole::EquityBackup => self.equity_backup,
            ProviderRole::Crypto => self.crypto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheTtl {
    pub quote: Duration,
    pub historical: Duration,
    pub search: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            quote: Duration::from_secs(15 * 60),
            historical: Duration::from_secs(60 * 60),
            search: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheTtl {
    fn for_category(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Quote => self.quote,
            CacheCategory::Historical => self.historical,
            CacheCategory::Search => self.search,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub limits: ProviderLimits,
    pub rate_window: Duration,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub ttl: CacheTtl,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            limits: ProviderLimits::default(),
            rate_window: DEFAULT_WINDOW,
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            ttl: CacheTtl::default(),
        }
    }
}

/// What happened when a provider was considered for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Provider answered but with nothing usable.
    Empty,
    RateLimited,
    CircuitOpen,
    Failed { message: String },
}

impl From<&MarketDataError> for AttemptOutcome {
    fn from(error: &MarketDataError) -> Self {
        match error {
            MarketDataError::RateLimitExceeded { .. } => AttemptOutcome::RateLimited,
            MarketDataError::ProviderUnavailable { .. } => AttemptOutcome::CircuitOpen,
            other => AttemptOutcome::Failed {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Result of an aggregated lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
    pub data: Option<T>,
    pub source: Option<String>,
    pub from_cache: bool,
    pub attempts: Vec<ProviderAttempt>,
}

impl<T> Fetched<T> {
    fn miss(attempts: Vec<ProviderAttempt>) -> Self {
        Self {
            data: None,
            source: None,
            from_cache: false,
            attempts,
        }
    }
}

#[derive(Serialize)]
struct CachedRef<'a, T> {
    source: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Cached<T> {
    source: String,
    data: T,
}

struct ProviderSlot {
    provider: Arc<dyn MarketDataProvider>,
    state: ProviderState,
}

pub struct Aggregator {
    slots: Vec<ProviderSlot>,
    cache: Option<Arc<dyn CacheStore>>,
    events: Option<EventSender<ProviderEvent>>,
    config: AggregatorConfig,
}

impl Aggregator {
    /// Build an aggregator over `providers`. Only the equity-primary provider
    /// gets a circuit breaker.
    pub fn new(config: AggregatorConfig, providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| {
                let role = provider.role();
                let breaker =
                    (role == ProviderRole::EquityPrimary).then(|| config.breaker.clone());
                let state = ProviderState::new(
                    provider.id(),
                    config.limits.for_role(role),
                    config.rate_window,
                    breaker,
                );
                ProviderSlot { provider, state }
            })
            .collect();

        Self {
            slots,
            cache: None,
            events: None,
            config,
        }
    }

    /// Yahoo + Alpha Vantage (when a key is configured) + CoinGecko.
    pub fn with_default_providers(
        config: AggregatorConfig,
        alpha_vantage_key: Option<String>,
    ) -> Self {
        let mut providers: Vec<Arc<dyn MarketDataProvider>> = vec![Arc::new(YahooProvider::new())];

        match alpha_vantage_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => providers.push(Arc::new(AlphaVantageProvider::new(key))),
            None => tracing::info!("Alpha Vantage disabled: no API key configured"),
        }
        providers.push(Arc::new(CoinGeckoProvider::new()));

        Self::new(config, providers)
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_events(mut self, events: EventSender<ProviderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.provider.id()).collect()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.slots.iter().map(|s| s.state.status()).collect()
    }

    fn emit(&self, event: ProviderEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Providers in the order they should be tried for `symbol`.
    fn provider_order(&self, symbol: Option<&str>) -> Vec<&ProviderSlot> {
        let crypto_first = symbol.map(is_crypto_symbol).unwrap_or(false);
        let rank = |role: ProviderRole| match (crypto_first, role) {
            (true, ProviderRole::Crypto) => 0,
            (true, ProviderRole::EquityPrimary) => 1,
            (true, ProviderRole::EquityBackup) => 2,
            (false, ProviderRole::EquityPrimary) => 0,
            (false, ProviderRole::EquityBackup) => 1,
            (false, ProviderRole::Crypto) => 2,
        };

        let mut ordered: Vec<&ProviderSlot> = self.slots.iter().collect();
        ordered.sort_by_key(|slot| rank(slot.provider.role()));
        ordered
    }

    pub async fn get_quote(&self, symbol: &str, cancel: &CancellationToken) -> Fetched<Quote> {
        let owned = symbol.to_string();
        self.fetch(
            "quote",
            CacheCategory::Quote,
            cache_key(symbol, None, None),
            Some(symbol),
            cancel,
            |quote: &Quote| quote.validate().is_ok(),
            move |provider| {
                let symbol = owned.clone();
                async move { provider.quote(&symbol).await }
            },
        )
        .await
    }

    pub async fn get_historical(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
        cancel: &CancellationToken,
    ) -> Fetched<MarketSeries> {
        let owned = symbol.to_string();
        self.fetch(
            "historical",
            CacheCategory::Historical,
            cache_key(symbol, Some(period.as_str()), Some(interval.as_str())),
            Some(symbol),
            cancel,
            |series: &MarketSeries| !series.is_empty(),
            move |provider| {
                let symbol = owned.clone();
                async move { provider.historical(&symbol, period, interval).await }
            },
        )
        .await
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Fetched<Vec<SymbolMatch>> {
        let owned = query.trim().to_string();
        let limit_key = limit.to_string();
        self.fetch(
            "search",
            CacheCategory::Search,
            cache_key(query, Some(&limit_key), None),
            None,
            cancel,
            |matches: &Vec<SymbolMatch>| !matches.is_empty(),
            move |provider| {
                let query = owned.clone();
                async move { provider.search(&query, limit).await }
            },
        )
        .await
    }

    async fn cache_read<T: DeserializeOwned>(
        &self,
        category: CacheCategory,
        key: &str,
    ) -> Option<Cached<T>> {
        let cache = self.cache.as_ref()?;
        match cache.get(category, key).await {
            Ok(Some(entry)) => match serde_json::from_value::<Cached<T>>(entry.payload) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    tracing::warn!("Discarding undecodable cache entry {}:{}: {}", category.as_str(), key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}:{}: {}", category.as_str(), key, e);
                self.emit(ProviderEvent::CacheFailure {
                    operation: "get",
                    message: e.to_string(),
                });
                None
            }
        }
    }

    async fn cache_write<T: Serialize>(
        &self,
        category: CacheCategory,
        key: &str,
        source: &str,
        data: &T,
    ) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };

        let payload = match serde_json::to_value(CachedRef { source, data }) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Could not serialize {}:{} for cache: {}", category.as_str(), key, e);
                return;
            }
        };

        let ttl = self.config.ttl.for_category(category);
        if let Err(e) = cache.set(category, key, payload, ttl).await {
            tracing::warn!("Cache write failed for {}:{}: {}", category.as_str(), key, e);
            self.emit(ProviderEvent::CacheFailure {
                operation: "set",
                message: e.to_string(),
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch<T, F, Fut>(
        &self,
        operation: &'static str,
        category: CacheCategory,
        key: String,
        symbol: Option<&str>,
        cancel: &CancellationToken,
        is_usable: fn(&T) -> bool,
        call: F,
    ) -> Fetched<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        if let Some(cached) = self.cache_read::<T>(category, &key).await {
            tracing::debug!("Cache hit for {} {}", operation, key);
            return Fetched {
                data: Some(cached.data),
                source: Some(cached.source),
                from_cache: true,
                attempts: Vec::new(),
            };
        }

        let mut attempts = Vec::new();

        for slot in self.provider_order(symbol) {
            let provider = slot.provider.id();

            if let Some(symbol) = symbol {
                if !slot.provider.supports_symbol(symbol) {
                    continue;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            if let Err(rejected) = slot.state.admit().check(provider) {
                tracing::debug!("Skipping for {} {}: {}", operation, key, rejected);
                self.emit(match rejected {
                    MarketDataError::RateLimitExceeded { .. } => ProviderEvent::RateLimited {
                        provider: provider.to_string(),
                    },
                    _ => ProviderEvent::CircuitSkipped {
                        provider: provider.to_string(),
                    },
                });
                attempts.push(ProviderAttempt {
                    provider: provider.to_string(),
                    outcome: AttemptOutcome::from(&rejected),
                });
                continue;
            }

            let result = retry_with_backoff(&self.config.retry, provider, cancel, || {
                call(slot.provider.clone())
            })
            .await;

            match result {
                Ok(data) if is_usable(&data) => {
                    slot.state.record_success();
                    self.cache_write(category, &key, provider, &data).await;
                    attempts.push(ProviderAttempt {
                        provider: provider.to_string(),
                        outcome: AttemptOutcome::Success,
                    });
                    tracing::debug!("{} {} served by {}", operation, key, provider);
                    return Fetched {
                        data: Some(data),
                        source: Some(provider.to_string()),
                        from_cache: false,
                        attempts,
                    };
                }
                Ok(_) => {
                    self.emit(ProviderEvent::Fallback {
                        from: provider.to_string(),
                        reason: "empty response".to_string(),
                    });
                    attempts.push(ProviderAttempt {
                        provider: provider.to_string(),
                        outcome: AttemptOutcome::Empty,
                    });
                }
                Err(MarketDataError::Cancelled) => {
                    tracing::debug!("{} {} cancelled during {}", operation, key, provider);
                    attempts.push(ProviderAttempt {
                        provider: provider.to_string(),
                        outcome: AttemptOutcome::from(&MarketDataError::Cancelled),
                    });
                    break;
                }
                Err(e) => {
                    if e.is_provider_fault() && slot.state.record_failure() {
                        self.emit(ProviderEvent::CircuitOpened {
                            provider: provider.to_string(),
                        });
                    }
                    tracing::debug!("{} failed for {} {}: {}", provider, operation, key, e);
                    self.emit(ProviderEvent::Fallback {
                        from: provider.to_string(),
                        reason: e.to_string(),
                    });
                    attempts.push(ProviderAttempt {
                        provider: provider.to_string(),
                        outcome: AttemptOutcome::from(&e),
                    });
                }
            }
        }

        tracing::warn!("No provider could serve {} {}", operation, key);
        self.emit(ProviderEvent::Exhausted {
            operation,
            symbol: key,
        });
        Fetched::miss(attempts)
    }
}

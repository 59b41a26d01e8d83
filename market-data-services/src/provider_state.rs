//! Mutable per-provider guard: rate limiter plus optional circuit breaker,
//! behind one mutex per provider.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Transition};
use crate::error::MarketDataError;
use crate::rate_limiter::FixedWindowLimiter;

/// Outcome of asking a provider's guard for permission to call it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    RateLimited,
    CircuitOpen,
}

impl Admission {
    /// The rejection as an error, so skipped providers report like failed ones.
    pub fn check(self, provider: &str) -> Result<(), MarketDataError> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::RateLimited => Err(MarketDataError::RateLimitExceeded {
                provider: provider.to_string(),
            }),
            Admission::CircuitOpen => Err(MarketDataError::ProviderUnavailable {
                provider: provider.to_string(),
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    limiter: FixedWindowLimiter,
    breaker: Option<CircuitBreaker>,
}

/// Point-in-time view of a provider's guard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: String,
    pub rate_limit: u32,
    pub requests_in_window: u32,
    pub window_resets_in_ms: u64,
    pub circuit: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
pub struct ProviderState {
    provider: &'static str,
    inner: Mutex<Inner>,
}

impl ProviderState {
    pub fn new(
        provider: &'static str,
        limit_per_window: u32,
        window: Duration,
        breaker: Option<CircuitBreakerConfig>,
    ) -> Self {
        Self {
            provider,
            inner: Mutex::new(Inner {
                limiter: FixedWindowLimiter::new(limit_per_window, window, Instant::now()),
                breaker: breaker.map(CircuitBreaker::new),
            }),
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Lock the state, recovering from poison. A poisoned guard only means a
    /// panic happened mid-update; stale counters are preferable to panicking
    /// every later request.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Provider state mutex for {} was poisoned, recovering", self.provider);
            poisoned.into_inner()
        })
    }

    /// The breaker is consulted first so an open circuit does not burn a
    /// rate-limit slot.
    pub fn admit_at(&self, now: Instant) -> Admission {
        let mut inner = self.lock();

        if let Some(breaker) = inner.breaker.as_mut() {
            let (allowed, transition) = breaker.allow(now);
            if transition == Some(Transition::Closed) {
                tracing::info!("Circuit for {} closed after cool-down", self.provider);
            }
            if !allowed {
                return Admission::CircuitOpen;
            }
        }

        if inner.limiter.try_acquire(now) {
            Admission::Allowed
        } else {
            Admission::RateLimited
        }
    }

    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    pub fn record_success(&self) {
        if let Some(breaker) = self.lock().breaker.as_mut() {
            breaker.record_success();
        }
    }

    /// Returns `true` when this failure opened the circuit.
    pub fn record_failure_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        let Some(breaker) = inner.breaker.as_mut() else {
            return false;
        };

        let opened = breaker.record_failure(now) == Some(Transition::Opened);
        if opened {
            tracing::warn!(
                "Circuit for {} opened after {} consecutive failures",
                self.provider,
                breaker.consecutive_failures()
            );
        }
        opened
    }

    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.lock().breaker.as_ref().map(|b| b.state())
    }

    pub fn status_at(&self, now: Instant) -> ProviderStatus {
        let inner = self.lock();
        ProviderStatus {
            provider: self.provider.to_string(),
            rate_limit: inner.limiter.limit(),
            requests_in_window: inner.limiter.request_count(),
            window_resets_in_ms: inner.limiter.resets_in(now).as_millis() as u64,
            circuit: inner.breaker.as_ref().map(|b| b.state().to_string()),
            consecutive_failures: inner
                .breaker
                .as_ref()
                .map(|b| b.consecutive_failures())
                .unwrap_or(0),
        }
    }

    pub fn status(&self) -> ProviderStatus {
        self.status_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_circuit_does_not_consume_rate_limit() {
        let state = ProviderState::new(
            "yahoo",
            10,
            Duration::from_secs(60),
            Some(CircuitBreakerConfig::default()),
        );
        let now = Instant::now();
        for _ in 0..3 {
            state.record_failure_at(now);
        }
        assert_eq!(state.circuit_state(), Some(CircuitState::Open));

        for _ in 0..5 {
            assert_eq!(state.admit_at(now), Admission::CircuitOpen);
        }
        assert_eq!(state.status_at(now).requests_in_window, 0);
        assert!(matches!(
            state.admit_at(now).check("yahoo"),
            Err(MarketDataError::ProviderUnavailable { .. })
        ));
    }

    #[test]
    fn test_provider_without_breaker_ignores_failures() {
        let state = ProviderState::new("coingecko", 1, Duration::from_secs(60), None);
        let now = Instant::now();
        for _ in 0..10 {
            assert!(!state.record_failure_at(now));
        }
        assert_eq!(state.circuit_state(), None);
        assert_eq!(state.admit_at(now), Admission::Allowed);
        assert_eq!(state.admit_at(now), Admission::RateLimited);
        assert!(matches!(
            state.admit_at(now).check("coingecko"),
            Err(MarketDataError::RateLimitExceeded { .. })
        ));
        assert!(Admission::Allowed.check("coingecko").is_ok());
    }
}

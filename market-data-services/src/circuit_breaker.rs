//! Two-state circuit breaker for an unreliable provider.
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls short-circuit without touching the network.
//!
//! The breaker opens once `failure_threshold` consecutive failures all fall
//! inside the trailing `failure_window`. It stays open until
//! `cooldown` has elapsed since the last failure, then closes with a cleared
//! counter. A success clears the counter but never closes an open breaker.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Change reported back to the caller so it can log or emit an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    Opened,
    Closed,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Failures of the current streak that are still inside the window.
    recent_failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            recent_failures: VecDeque::new(),
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.recent_failures.len() as u32
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Whether a call may go out at `now`. Closes the breaker when the
    /// cool-down since the last failure has passed.
    pub fn allow(&mut self, now: Instant) -> (bool, Option<Transition>) {
        if self.state == CircuitState::Closed {
            return (true, None);
        }

        let cooled = self
            .last_failure
            .map(|last| now.saturating_duration_since(last) >= self.config.cooldown)
            .unwrap_or(true);

        if cooled {
            self.state = CircuitState::Closed;
            self.recent_failures.clear();
            (true, Some(Transition::Closed))
        } else {
            (false, None)
        }
    }

    pub fn record_success(&mut self) {
        self.recent_failures.clear();
    }

    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        while let Some(&oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(oldest) > self.config.failure_window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }

        self.recent_failures.push_back(now);
        self.last_failure = Some(now);

        if self.state == CircuitState::Closed
            && self.consecutive_failures() >= self.config.failure_threshold
        {
            self.state = CircuitState::Open;
            return Some(Transition::Opened);
        }
        None
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

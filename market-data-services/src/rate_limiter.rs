//! Fixed-window request counter for a single provider.
//!
//! The window restarts once `window` has elapsed since it opened. Inside a
//! window a request is admitted iff fewer than `limit` requests were already
//! admitted; a rejected request leaves the counter untouched.

use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    window_start: Instant,
    request_count: u32,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            limit,
            window,
            window_start: now,
            request_count: 0,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, DEFAULT_WINDOW, Instant::now())
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.request_count = 0;
        }
    }

    /// Try to take one slot in the current window.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.request_count < self.limit {
            self.request_count += 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.limit - self.request_count.min(self.limit)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    /// Time until the current window closes.
    pub fn resets_in(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

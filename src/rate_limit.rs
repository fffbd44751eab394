//! # Rate Limiter Module
//!
//! Sliding-window limiter keyed by user id. Excess messages are rejected with the
//! time left until the oldest message in the window expires; they are never queued.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Accepted,
    Rejected { wait: Duration },
}

impl RateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RateDecision::Accepted)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<i64, VecDeque<Instant>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn check(&self, user_id: i64) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    /// Check and record a message from `user_id` arriving at `now`
    pub fn check_at(&self, user_id: i64, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(user_id).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.max_messages {
            let oldest = window.front().copied().unwrap_or(now);
            let wait = self
                .config
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            return RateDecision::Rejected {
                wait: wait.max(Duration::from_millis(1)),
            };
        }

        window.push_back(now);
        RateDecision::Accepted
    }

    /// Drop windows with no recent traffic
    pub fn prune(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.config.window)
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

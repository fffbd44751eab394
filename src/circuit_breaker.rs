//! # Circuit Breaker Module
//!
//! Each remote capability in a chain owns a breaker. When a capability keeps
//! exhausting its retry budget the breaker opens and the invoker skips it,
//! moving straight to the next capability until the reset time has elapsed.

use std::sync::Mutex;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one remote capability
///
/// # State Machine
///
/// - **Closed**: attempts pass through
/// - **Open**: `threshold` consecutive exhausted invocations; the capability is skipped
/// - **Half-Open**: after `reset_after` one invocation is let through again
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    /// `true` while the capability should be skipped
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.opened_at {
            Some(opened) if opened.elapsed() < self.config.reset_after => true,
            Some(_) => {
                // Half-open: allow one more invocation, a single failure re-opens
                state.opened_at = None;
                state.consecutive_failures = self.config.threshold.saturating_sub(1);
                false
            }
            None => false,
        }
    }

    /// Record an invocation that exhausted every attempt
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.threshold {
            state.opened_at = Some(Instant::now());
        }
    }

    /// Record a validated result
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = BreakerState::default();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 2,
            ..Default::default()
        });

        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_closes() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            ..Default::default()
        });

        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_after_reset() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            reset_after: Duration::from_millis(0),
        });

        breaker.record_failure();
        // reset_after of zero lets the next check through
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.opened_at_for_tests().is_some());
    }

    impl CircuitBreaker {
        fn opened_at_for_tests(&self) -> Option<Instant> {
            self.state.lock().unwrap().opened_at
        }
    }
}

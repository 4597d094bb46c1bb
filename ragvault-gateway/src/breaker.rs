//! Per-provider circuit breakers
//!
//! A provider opens after three consecutive failures and stays open for
//! 60 seconds. The first call after the window is allowed through
//! (half-open); success resets the counters, another failure re-opens
//! the window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ragvault_core::traits::clock::Clock;
use std::sync::Arc;
use tracing::{debug, warn};

const OPEN_THRESHOLD: u32 = 3;
const RESET_SECONDS: i64 = 60;

#[derive(Debug, Default, Clone, Copy)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

/// Process-wide breaker map, created at startup and shared by
/// reference. State transitions happen under the entry lock so
/// increments and window resets are atomic.
pub struct CircuitBreakerRegistry {
    states: DashMap<String, BreakerState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    /// Whether calls to `provider` should be skipped right now. The
    /// first check after the open window expires resets the counter and
    /// lets one call through.
    #[must_use]
    pub fn is_open(&self, provider: &str) -> bool {
        let mut entry = self.states.entry(provider.to_string()).or_default();
        if entry.consecutive_failures < OPEN_THRESHOLD {
            return false;
        }
        match entry.open_until {
            Some(open_until) if self.clock.now() < open_until => true,
            _ => {
                // Half-open: allow the next attempt.
                debug!(provider, "circuit half-open, allowing a probe call");
                entry.consecutive_failures = 0;
                entry.open_until = None;
                false
            }
        }
    }

    pub fn record_failure(&self, provider: &str) {
        let mut entry = self.states.entry(provider.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.open_until = Some(self.clock.now() + Duration::seconds(RESET_SECONDS));
        warn!(
            provider,
            failures = entry.consecutive_failures,
            "circuit breaker recorded failure"
        );
    }

    pub fn record_success(&self, provider: &str) {
        if let Some(mut entry) = self.states.get_mut(provider) {
            entry.consecutive_failures = 0;
            entry.open_until = None;
        }
    }

    /// Current consecutive failure count (operator diagnostics).
    #[must_use]
    pub fn failure_count(&self, provider: &str) -> u32 {
        self.states
            .get(provider)
            .map_or(0, |s| s.consecutive_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance(&self, secs: i64) {
            *self.now.lock() += Duration::seconds(secs);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    #[test]
    fn opens_after_three_consecutive_failures() {
        let registry = CircuitBreakerRegistry::new(FakeClock::new());
        assert!(!registry.is_open("openai"));

        registry.record_failure("openai");
        registry.record_failure("openai");
        assert!(!registry.is_open("openai"));

        registry.record_failure("openai");
        assert!(registry.is_open("openai"));
        assert_eq!(registry.failure_count("openai"), 3);
    }

    #[test]
    fn half_opens_after_the_window() {
        let clock = FakeClock::new();
        let registry = CircuitBreakerRegistry::new(clock.clone());
        for _ in 0..3 {
            registry.record_failure("openai");
        }
        assert!(registry.is_open("openai"));

        clock.advance(61);
        // First check after the window allows a probe.
        assert!(!registry.is_open("openai"));

        // Counters were reset; it takes three new failures to re-open.
        registry.record_failure("openai");
        assert!(!registry.is_open("openai"));
    }

    #[test]
    fn success_resets_counters() {
        let registry = CircuitBreakerRegistry::new(FakeClock::new());
        registry.record_failure("openai");
        registry.record_failure("openai");
        registry.record_success("openai");
        assert_eq!(registry.failure_count("openai"), 0);

        registry.record_failure("azure_openai");
        assert_eq!(registry.failure_count("azure_openai"), 1);
        assert_eq!(registry.failure_count("openai"), 0);
    }
}

//! Circuit breaker for best-effort map services
//!
//! A secondary provider that keeps failing or timing out is skipped until
//! its recovery time has passed, so it stops eating the fan-out budget on
//! every run. Failure counts live in storage, next to the distances, so
//! consecutive planning processes see the same state.

use chrono::{DateTime, Duration, Utc};

use crate::types::ProviderHealth;

/// Default circuit breaker threshold (3 failures)
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: i64 = 3;

/// Default circuit breaker recovery time (5 minutes)
pub const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: i64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker {
    threshold: i64,
    recovery_time: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            Duration::seconds(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
        )
    }
}

impl CircuitBreaker {
    pub fn new(threshold: i64, recovery_time: Duration) -> Self {
        Self {
            threshold,
            recovery_time,
        }
    }

    /// Open means the provider should be skipped.
    /// After the recovery time one attempt is let through (half-open); a
    /// failure there bumps `last_failure_at` and opens the circuit again.
    pub fn is_open(&self, health: &ProviderHealth, now: DateTime<Utc>) -> bool {
        if health.failure_count < self.threshold {
            return false;
        }
        match health.last_failure_at {
            Some(last) => now - last < self.recovery_time,
            None => true,
        }
    }
}

//! Circuit breaker guarding the upstream quote endpoint.
//!
//! After `failure_threshold` consecutive transient failures the circuit opens
//! and requests are refused for `recovery_timeout`. Then exactly one probe is
//! admitted; its outcome closes the circuit or opens it for another period.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant, failures: u32 },
    /// A probe was admitted at `since`. A probe that never reports back (its
    /// future was dropped) stops blocking others after `recovery_timeout`.
    Probing { since: Instant, failures: u32 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    /// Whether a request may go out now. Admitting the half-open probe
    /// counts as the one allowed request until it reports back.
    pub fn allow_request(&self) -> bool {
        let mut phase = self.lock();
        let now = Instant::now();
        match *phase {
            Phase::Closed { .. } => true,
            Phase::Open { until, failures } if now >= until => {
                info!(failures, "circuit half-open, admitting one probe");
                *phase = Phase::Probing { since: now, failures };
                true
            }
            Phase::Probing { since, failures }
                if now.saturating_duration_since(since) >= self.config.recovery_timeout =>
            {
                *phase = Phase::Probing { since: now, failures };
                true
            }
            Phase::Open { .. } | Phase::Probing { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::Closed { .. }) {
            info!("circuit closed");
        }
        *phase = Phase::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut phase = self.lock();
        let now = Instant::now();
        let failures = match *phase {
            Phase::Closed { failures }
            | Phase::Open { failures, .. }
            | Phase::Probing { failures, .. } => failures.saturating_add(1),
        };

        let trips = match *phase {
            Phase::Closed { .. } => failures >= self.config.failure_threshold,
            Phase::Probing { .. } => true,
            Phase::Open { .. } => false,
        };

        *phase = if trips {
            warn!(
                failures,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "circuit opened"
            );
            Phase::Open {
                until: now + self.config.recovery_timeout,
                failures,
            }
        } else {
            match *phase {
                Phase::Open { until, .. } => Phase::Open { until, failures },
                _ => Phase::Closed { failures },
            }
        };
    }

    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Probing { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match *self.lock() {
            Phase::Closed { failures }
            | Phase::Open { failures, .. }
            | Phase::Probing { failures, .. } => failures,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(2);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_a_single_probe_after_the_recovery_timeout() {
        let breaker = breaker(1);
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn an_abandoned_probe_does_not_block_forever() {
        let breaker = breaker(1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_request());

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(breaker.allow_request());
    }
}

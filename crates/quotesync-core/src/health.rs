//! Coarse health tracking across cycles.
//!
//! State changes only in [`HealthMonitor::record_cycle`]. Readers get a cloned
//! snapshot from [`HealthMonitor::status`] and never block the scrape loop for
//! longer than a read lock.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::orchestrator::CycleResult;
use crate::UtcDateTime;

/// Health classification exposed to probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Thresholds for the health state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    /// A successful cycle whose failure rate reaches this fraction is `Degraded`.
    pub failure_threshold: f64,
    /// Consecutive zero-success cycles that make the process `Unhealthy`.
    pub unhealthy_after: u32,
    /// Recent cycles searched for a success before declaring `Unhealthy`.
    pub lookback_cycles: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.2,
            unhealthy_after: 5,
            lookback_cycles: 5,
        }
    }
}

/// Snapshot of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub last_success_at: Option<UtcDateTime>,
    pub consecutive_failed_cycles: u32,
    pub cycles_recorded: u64,
    pub last_cycle_at: Option<UtcDateTime>,
    pub last_failure_rate: Option<f64>,
}

impl HealthState {
    fn initial() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_success_at: None,
            consecutive_failed_cycles: 0,
            cycles_recorded: 0,
            last_cycle_at: None,
            last_failure_rate: None,
        }
    }

    /// One-line description for periodic logs.
    pub fn summary(&self) -> String {
        let last_success = self
            .last_success_at
            .map_or_else(|| String::from("never"), UtcDateTime::format_rfc3339);
        let failure_rate = self
            .last_failure_rate
            .map_or_else(|| String::from("n/a"), |rate| format!("{:.1}%", rate * 100.0));
        format!(
            "status={} cycles={} consecutive_failed={} last_failure_rate={} last_success={}",
            self.status,
            self.cycles_recorded,
            self.consecutive_failed_cycles,
            failure_rate,
            last_success
        )
    }
}

#[derive(Debug)]
struct MonitorInner {
    state: HealthState,
    recent_successes: VecDeque<bool>,
}

/// Shared, cheaply cloneable health tracker.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    inner: Arc<RwLock<MonitorInner>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(MonitorInner {
                state: HealthState::initial(),
                recent_successes: VecDeque::new(),
            })),
        }
    }

    /// Fold one cycle into the state machine.
    ///
    /// Cycles that attempted nothing, and cancelled cycles without a single
    /// success, do not move the status.
    pub fn record_cycle(&self, cycle: &CycleResult) {
        let mut inner = self
            .inner
            .write()
            .expect("health monitor lock is not poisoned");

        inner.state.cycles_recorded += 1;
        inner.state.last_cycle_at = Some(cycle.finished_at);

        if cycle.attempted == 0 || (cycle.cancelled && cycle.succeeded == 0) {
            return;
        }

        let failure_rate = cycle.failure_rate();
        let succeeded = cycle.succeeded > 0;
        inner.state.last_failure_rate = Some(failure_rate);

        let lookback = self.config.lookback_cycles.max(1) as usize;
        inner.recent_successes.push_back(succeeded);
        while inner.recent_successes.len() > lookback {
            inner.recent_successes.pop_front();
        }

        let previous = inner.state.status;
        let next = if succeeded {
            inner.state.consecutive_failed_cycles = 0;
            inner.state.last_success_at = Some(cycle.finished_at);
            if failure_rate < self.config.failure_threshold {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            }
        } else {
            inner.state.consecutive_failed_cycles += 1;
            let window_full = inner.recent_successes.len() == lookback;
            let recent_success = inner.recent_successes.iter().any(|success| *success);
            if inner.state.consecutive_failed_cycles >= self.config.unhealthy_after
                || (window_full && !recent_success)
            {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            }
        };
        inner.state.status = next;

        if next != previous {
            match next {
                HealthStatus::Healthy => info!(from = %previous, to = %next, "health recovered"),
                _ => warn!(
                    from = %previous,
                    to = %next,
                    consecutive_failed = inner.state.consecutive_failed_cycles,
                    failure_rate,
                    "health changed"
                ),
            }
        }
    }

    /// Current snapshot.
    pub fn status(&self) -> HealthState {
        self.inner
            .read()
            .expect("health monitor lock is not poisoned")
            .state
            .clone()
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CycleResult;

    fn cycle(attempted: usize, succeeded: usize) -> CycleResult {
        let mut result = CycleResult::empty(UtcDateTime::now());
        result.attempted = attempted;
        result.succeeded = succeeded;
        result.fetch_failed_permanent = attempted - succeeded;
        result.failed = attempted - succeeded;
        result
    }

    #[test]
    fn starts_healthy_without_history() {
        let state = HealthMonitor::default().status();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.cycles_recorded, 0);
        assert!(state.summary().contains("last_success=never"));
    }

    #[test]
    fn five_failed_cycles_make_the_process_unhealthy() {
        let monitor = HealthMonitor::default();
        monitor.record_cycle(&cycle(10, 10));

        for expected in [
            HealthStatus::Degraded,
            HealthStatus::Degraded,
            HealthStatus::Degraded,
            HealthStatus::Degraded,
            HealthStatus::Unhealthy,
        ] {
            monitor.record_cycle(&cycle(10, 0));
            assert_eq!(monitor.status().status, expected);
        }
        assert_eq!(monitor.status().consecutive_failed_cycles, 5);

        monitor.record_cycle(&cycle(10, 10));
        let state = monitor.status();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failed_cycles, 0);
        assert!(state.last_success_at.is_some());
    }

    #[test]
    fn partial_failure_above_threshold_is_degraded() {
        let monitor = HealthMonitor::default();

        monitor.record_cycle(&cycle(10, 8));
        assert_eq!(monitor.status().status, HealthStatus::Degraded);

        monitor.record_cycle(&cycle(10, 9));
        assert_eq!(monitor.status().status, HealthStatus::Healthy);
    }

    #[test]
    fn lookback_without_success_is_unhealthy_before_the_streak_limit() {
        let monitor = HealthMonitor::new(HealthConfig {
            lookback_cycles: 2,
            ..HealthConfig::default()
        });

        monitor.record_cycle(&cycle(4, 0));
        assert_eq!(monitor.status().status, HealthStatus::Degraded);
        monitor.record_cycle(&cycle(4, 0));
        assert_eq!(monitor.status().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn empty_and_cancelled_cycles_do_not_move_the_status() {
        let monitor = HealthMonitor::default();

        monitor.record_cycle(&cycle(0, 0));
        let mut cancelled = cycle(3, 0);
        cancelled.cancelled = true;
        monitor.record_cycle(&cancelled);

        let state = monitor.status();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failed_cycles, 0);
        assert_eq!(state.cycles_recorded, 2);
        assert!(state.last_cycle_at.is_some());
    }
}

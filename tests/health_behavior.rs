//! Health state transitions driven by cycle results.

use quotesync_core::{CycleResult, HealthConfig, HealthMonitor, HealthStatus, UtcDateTime};

fn cycle(attempted: usize, succeeded: usize) -> CycleResult {
    let mut result = CycleResult::empty(UtcDateTime::now());
    result.attempted = attempted;
    result.succeeded = succeeded;
    result.failed = attempted - succeeded;
    result.fetch_failed_transient = attempted - succeeded;
    result
}

#[test]
fn when_five_cycles_in_a_row_store_nothing_the_service_is_unhealthy_until_one_succeeds() {
    // Given: a monitor with the default thresholds
    let monitor = HealthMonitor::new(HealthConfig::default());
    assert_eq!(monitor.status().status, HealthStatus::Healthy);

    // When: four zero-success cycles are recorded
    for _ in 0..4 {
        monitor.record_cycle(&cycle(10, 0));
    }

    // Then: the service is degraded, not yet unhealthy
    assert_eq!(monitor.status().status, HealthStatus::Degraded);
    assert_eq!(monitor.status().consecutive_failed_cycles, 4);

    // When: the fifth one fails too
    monitor.record_cycle(&cycle(10, 0));

    // Then: it turns unhealthy
    let state = monitor.status();
    assert_eq!(state.status, HealthStatus::Unhealthy);
    assert!(state.last_success_at.is_none());

    // When: a fully successful cycle follows
    monitor.record_cycle(&cycle(10, 10));

    // Then: it recovers immediately
    let state = monitor.status();
    assert_eq!(state.status, HealthStatus::Healthy);
    assert_eq!(state.consecutive_failed_cycles, 0);
    assert!(state.last_success_at.is_some());
    assert_eq!(state.cycles_recorded, 6);
}

#[test]
fn when_the_failure_rate_reaches_the_threshold_the_service_is_degraded() {
    let monitor = HealthMonitor::default();

    monitor.record_cycle(&cycle(10, 8));
    assert_eq!(monitor.status().status, HealthStatus::Degraded);

    monitor.record_cycle(&cycle(10, 9));
    assert_eq!(monitor.status().status, HealthStatus::Healthy);
    assert_eq!(monitor.status().last_failure_rate, Some(0.1));
}

#[test]
fn when_a_cycle_attempts_nothing_the_status_does_not_move() {
    // Given: a degraded service
    let monitor = HealthMonitor::default();
    monitor.record_cycle(&cycle(4, 0));

    // When: an empty, cancelled cycle is recorded
    let mut cancelled = cycle(0, 0);
    cancelled.cancelled = true;
    monitor.record_cycle(&cancelled);

    // Then: status and failure streak are untouched
    let state = monitor.status();
    assert_eq!(state.status, HealthStatus::Degraded);
    assert_eq!(state.consecutive_failed_cycles, 1);
    assert_eq!(state.cycles_recorded, 2);
    assert!(state.summary().contains("status=degraded"));
}

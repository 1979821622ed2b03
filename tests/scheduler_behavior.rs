//! The scheduler loop, shutdown and its effect on health.

use std::sync::Arc;
use std::time::Duration;

use quotesync_core::{
    BatchOrchestrator, FetchError, HealthMonitor, HealthStatus, MemoryStore, ScheduleConfig,
    Scheduler,
};
use quotesync_tests::{fast_orchestrator_config, fast_retry, symbols, ScriptedSource};
use tokio::time::Instant;

fn scheduler(
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    config: ScheduleConfig,
) -> Scheduler {
    let orchestrator = BatchOrchestrator::new(source, store, fast_orchestrator_config(100))
        .with_retry_config(fast_retry(0));
    Scheduler::new(
        orchestrator,
        HealthMonitor::default(),
        symbols(&["AAPL", "MSFT", "NVDA", "AMZN"]),
        config,
    )
}

#[tokio::test(start_paused = true)]
async fn when_shutdown_arrives_mid_cycle_the_current_symbol_finishes_and_the_rest_are_skipped() {
    // Given: each fetch takes four seconds
    let source = Arc::new(ScriptedSource::with_latency(Duration::from_secs(4)));
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(Arc::clone(&source), Arc::clone(&store), ScheduleConfig::default());
    let start = Instant::now();

    // When: shutdown is requested while the second symbol is in flight
    let report = scheduler
        .run(tokio::time::sleep(Duration::from_secs(6)))
        .await;

    // Then: the drain finishes within the grace period and nothing new starts
    assert!(report.clean);
    assert_eq!(report.cycles_run, 1);
    let cycle = report.last_cycle.expect("drained cycle");
    assert!(cycle.cancelled);
    assert_eq!(cycle.attempted, 2);
    assert_eq!(cycle.succeeded, 2);
    assert_eq!(store.len(), 2);
    assert_eq!(source.calls("NVDA"), 0);
    assert_eq!(Instant::now() - start, Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn when_the_drain_exceeds_the_grace_period_shutdown_is_unclean() {
    // Given: a fetch that only gives up at its five second timeout
    let source = Arc::new(ScriptedSource::with_latency(Duration::from_secs(120)));
    let scheduler = scheduler(
        source,
        Arc::new(MemoryStore::new()),
        ScheduleConfig {
            graceful_shutdown_timeout: Duration::from_secs(2),
            ..ScheduleConfig::default()
        },
    );
    let start = Instant::now();

    // When: shutdown is requested
    let report = scheduler
        .run(tokio::time::sleep(Duration::from_secs(1)))
        .await;

    // Then: the cycle is abandoned after the grace period
    assert!(!report.clean);
    assert!(report.last_cycle.is_none());
    assert_eq!(Instant::now() - start, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn when_every_cycle_fails_the_scheduler_drives_health_to_unhealthy() {
    // Given: an upstream that refuses every symbol
    let mut source = ScriptedSource::new();
    for name in ["AAPL", "MSFT", "NVDA", "AMZN"] {
        let refusals = (0..10).map(|_| Err(FetchError::Rejected { status: 403 })).collect();
        source = source.script(name, refusals);
    }
    let scheduler = scheduler(
        Arc::new(source),
        Arc::new(MemoryStore::new()),
        ScheduleConfig {
            interval: Duration::from_secs(60),
            ..ScheduleConfig::default()
        },
    );

    // When: five cycles run (t = 0, 60, 120, 180, 240)
    let report = scheduler
        .run(tokio::time::sleep(Duration::from_secs(250)))
        .await;

    // Then: five failed cycles are recorded and the service is unhealthy
    assert_eq!(report.cycles_run, 5);
    let state = scheduler.health().status();
    assert_eq!(state.status, HealthStatus::Unhealthy);
    assert_eq!(state.consecutive_failed_cycles, 5);
    assert_eq!(report.last_cycle.expect("cycle").fetch_failed_permanent, 4);
}

//! Fixed-interval cycle scheduling and graceful shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::health::HealthMonitor;
use crate::orchestrator::{BatchOrchestrator, CycleResult};
use crate::Symbol;

/// Timing of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub graceful_shutdown_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(300),
        }
    }
}

/// How the scheduler stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    /// `false` when the in-flight cycle had to be aborted.
    pub clean: bool,
    pub cycles_run: u64,
    pub last_cycle: Option<CycleResult>,
}

enum CycleEnd {
    Completed(Result<CycleResult, JoinError>),
    Drained(Result<CycleResult, JoinError>),
    Abandoned,
}

/// Owns the process lifetime: runs one cycle per interval until shutdown.
pub struct Scheduler {
    orchestrator: Arc<BatchOrchestrator>,
    health: HealthMonitor,
    symbols: Arc<[Symbol]>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(
        orchestrator: BatchOrchestrator,
        health: HealthMonitor,
        symbols: Vec<Symbol>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            health,
            symbols: symbols.into(),
            config,
        }
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// Cycles never overlap. The next cycle starts one interval after the
    /// previous one started, or immediately if that moment has passed.
    pub async fn run<F>(&self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let cancel = CancellationToken::new();
        let reporter = self.spawn_health_reporter(cancel.child_token());

        let mut cycles_run = 0_u64;
        let mut last_cycle = None;
        let mut next_start = Instant::now();

        info!(
            symbols = self.symbols.len(),
            interval_secs = self.config.interval.as_secs_f64(),
            "scheduler started"
        );

        let clean = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break true,
                _ = sleep_until(next_start) => {}
            }

            let cycle_start = Instant::now();
            next_start = cycle_start + self.config.interval;

            match self.drive_cycle(&cancel, &mut shutdown).await {
                CycleEnd::Completed(joined) => {
                    if let Some(result) = self.absorb(joined) {
                        cycles_run += 1;
                        last_cycle = Some(result);
                    }
                }
                CycleEnd::Drained(joined) => {
                    if let Some(result) = self.absorb(joined) {
                        cycles_run += 1;
                        last_cycle = Some(result);
                    }
                    break true;
                }
                CycleEnd::Abandoned => break false,
            }

            let now = Instant::now();
            if now >= next_start {
                warn!(
                    overrun_ms = now.saturating_duration_since(next_start).as_millis() as u64,
                    "cycle overran the scrape interval, starting the next one immediately"
                );
            }
        };

        cancel.cancel();
        let _ = reporter.await;

        if clean {
            info!(cycles_run, "scheduler stopped cleanly");
        } else {
            error!(
                cycles_run,
                timeout_secs = self.config.graceful_shutdown_timeout.as_secs_f64(),
                "in-flight cycle did not finish in time, shutdown is unclean"
            );
        }

        ShutdownReport {
            clean,
            cycles_run,
            last_cycle,
        }
    }

    /// Run exactly one cycle, still honouring `shutdown`.
    pub async fn run_once<F>(&self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let cancel = CancellationToken::new();

        let (clean, joined) = match self.drive_cycle(&cancel, &mut shutdown).await {
            CycleEnd::Completed(joined) | CycleEnd::Drained(joined) => (true, Some(joined)),
            CycleEnd::Abandoned => (false, None),
        };
        let last_cycle = joined.and_then(|joined| self.absorb(joined));

        ShutdownReport {
            clean,
            cycles_run: u64::from(last_cycle.is_some()),
            last_cycle,
        }
    }

    async fn drive_cycle<F>(&self, cancel: &CancellationToken, shutdown: &mut F) -> CycleEnd
    where
        F: Future<Output = ()> + Unpin,
    {
        let mut handle = self.spawn_cycle(cancel.clone());

        tokio::select! {
            joined = &mut handle => CycleEnd::Completed(joined),
            _ = shutdown => {
                info!(
                    timeout_secs = self.config.graceful_shutdown_timeout.as_secs_f64(),
                    "shutdown requested, draining in-flight cycle"
                );
                cancel.cancel();
                match tokio::time::timeout(self.config.graceful_shutdown_timeout, &mut handle).await {
                    Ok(joined) => CycleEnd::Drained(joined),
                    Err(_) => {
                        handle.abort();
                        CycleEnd::Abandoned
                    }
                }
            }
        }
    }

    fn spawn_cycle(&self, cancel: CancellationToken) -> JoinHandle<CycleResult> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let symbols = Arc::clone(&self.symbols);
        tokio::spawn(async move { orchestrator.run_cycle(&symbols, &cancel).await })
    }

    fn absorb(&self, joined: Result<CycleResult, JoinError>) -> Option<CycleResult> {
        match joined {
            Ok(result) => {
                self.health.record_cycle(&result);
                Some(result)
            }
            Err(join_error) => {
                error!(error = %join_error, "cycle task failed");
                None
            }
        }
    }

    fn spawn_health_reporter(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let health = self.health.clone();
        let period = self.config.health_check_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let state = health.status();
                        info!(status = %state.status, summary = %state.summary(), "health check");
                    }
                }
            }
        })
    }
}

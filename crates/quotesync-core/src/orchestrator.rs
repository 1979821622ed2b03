//! One scraping cycle: batches of symbols driven through
//! fetch, validate and store.
//!
//! Per-symbol failures never escape [`BatchOrchestrator::run_cycle`]; they are
//! recorded in the returned [`CycleResult`]. Cancellation is checked at symbol
//! boundaries and at every suspension point, never in the middle of a request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::retry::{RetryBudget, RetryConfig, RetryError, RetryPolicy};
use crate::source::{FetchError, QuoteSource};
use crate::storage::{Ack, StorageError, StorageWriter};
use crate::throttling::{RateLimiter, RequestPacer};
use crate::validation::Validator;
use crate::{Symbol, UtcDateTime};

/// Knobs of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub max_symbols_per_batch: usize,
    /// Symbols processed concurrently inside a batch.
    pub concurrency: usize,
    /// Upper bound on a single fetch attempt.
    pub request_timeout: Duration,
    /// Minimum spacing between consecutive symbol starts.
    pub request_delay: Duration,
    /// Time after which retries stop backing off and give up.
    pub cycle_budget: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_symbols_per_batch: 100,
            concurrency: 1,
            request_timeout: Duration::from_secs(10),
            request_delay: Duration::from_secs(2),
            cycle_budget: Duration::from_secs(60),
        }
    }
}

/// Pipeline stage at which a symbol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Validate,
    Store,
}

/// Failure category, matching the counters in [`CycleResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchPermanent,
    FetchExhausted,
    ValidationRejected,
    StorageFailed,
}

impl FailureKind {
    pub const fn stage(self) -> FailureStage {
        match self {
            Self::FetchPermanent | Self::FetchExhausted => FailureStage::Fetch,
            Self::ValidationRejected => FailureStage::Validate,
            Self::StorageFailed => FailureStage::Store,
        }
    }
}

/// One failed symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolFailure {
    pub symbol: Symbol,
    pub stage: FailureStage,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
}

impl SymbolFailure {
    fn new(symbol: &Symbol, kind: FailureKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            symbol: symbol.clone(),
            stage: kind.stage(),
            kind,
            reason: reason.into(),
            attempts,
        }
    }
}

/// What happened to one symbol that was started.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Stored { symbol: Symbol, ack: Ack },
    Failed(SymbolFailure),
}

/// Aggregate of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub duration_ms: u64,
    pub batches: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub validation_rejected: usize,
    pub fetch_failed_permanent: usize,
    pub fetch_failed_transient: usize,
    pub storage_failed: usize,
    pub cancelled: bool,
    pub failures: Vec<SymbolFailure>,
}

impl CycleResult {
    /// A cycle that has not processed anything yet.
    pub fn empty(started_at: UtcDateTime) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            batches: 0,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            validation_rejected: 0,
            fetch_failed_permanent: 0,
            fetch_failed_transient: 0,
            storage_failed: 0,
            cancelled: false,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, outcome: SymbolOutcome) {
        self.attempted += 1;
        match outcome {
            SymbolOutcome::Stored { .. } => self.succeeded += 1,
            SymbolOutcome::Failed(failure) => {
                self.failed += 1;
                match failure.kind {
                    FailureKind::FetchPermanent => self.fetch_failed_permanent += 1,
                    FailureKind::FetchExhausted => self.fetch_failed_transient += 1,
                    FailureKind::ValidationRejected => self.validation_rejected += 1,
                    FailureKind::StorageFailed => self.storage_failed += 1,
                }
                self.failures.push(failure);
            }
        }
    }

    /// Fraction of attempted symbols that were stored; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }

    /// Fraction of attempted symbols that failed; 0 when nothing ran.
    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failed as f64 / self.attempted as f64
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn failed_symbols(&self) -> Vec<&Symbol> {
        self.failures.iter().map(|failure| &failure.symbol).collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives symbols through the pipeline under the shared limiter and pacer.
pub struct BatchOrchestrator {
    source: Arc<dyn QuoteSource>,
    storage: Arc<dyn StorageWriter>,
    limiter: Arc<RateLimiter>,
    pacer: RequestPacer,
    retry: RetryPolicy,
    validator: Validator,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        storage: Arc<dyn StorageWriter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            storage,
            limiter: Arc::new(RateLimiter::new(30, Duration::from_secs(60))),
            pacer: RequestPacer::new(config.request_delay),
            retry: RetryPolicy::default(),
            validator: Validator::default(),
            config,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn source(&self) -> &dyn QuoteSource {
        self.source.as_ref()
    }

    pub fn storage(&self) -> &dyn StorageWriter {
        self.storage.as_ref()
    }

    /// Run one cycle over `symbols`.
    pub async fn run_cycle(&self, symbols: &[Symbol], cancel: &CancellationToken) -> CycleResult {
        let clock = Instant::now();
        let mut result = CycleResult::empty(UtcDateTime::now());
        let budget = RetryBudget::new(Some(clock + self.config.cycle_budget), cancel.clone());
        let batch_size = self.config.max_symbols_per_batch.max(1);
        let concurrency = self.config.concurrency.max(1);

        info!(
            cycle_id = %result.cycle_id,
            symbols = symbols.len(),
            batch_size,
            "cycle started"
        );

        'batches: for (index, batch) in symbols.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            result.batches += 1;
            debug!(batch = index + 1, size = batch.len(), "processing batch");

            for group in batch.chunks(concurrency) {
                let outcomes = join_all(
                    group
                        .iter()
                        .map(|symbol| self.process_symbol(symbol, cancel, &budget)),
                )
                .await;

                let mut interrupted = false;
                for outcome in outcomes {
                    match outcome {
                        Some(outcome) => result.record(outcome),
                        None => interrupted = true,
                    }
                }
                if interrupted || cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'batches;
                }
            }
        }

        result.finished_at = UtcDateTime::now();
        result.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            cycle_id = %result.cycle_id,
            attempted = result.attempted,
            succeeded = result.succeeded,
            validation_rejected = result.validation_rejected,
            fetch_failed_permanent = result.fetch_failed_permanent,
            fetch_failed_transient = result.fetch_failed_transient,
            storage_failed = result.storage_failed,
            cancelled = result.cancelled,
            duration_ms = result.duration_ms,
            "cycle finished"
        );
        result
    }

    /// `None` when cancellation stopped the symbol before its first request.
    async fn process_symbol(
        &self,
        symbol: &Symbol,
        cancel: &CancellationToken,
        budget: &RetryBudget,
    ) -> Option<SymbolOutcome> {
        if cancel.is_cancelled() || !self.pacer.wait(cancel).await {
            return None;
        }

        let fetched = self
            .retry
            .run(
                move |attempt| async move {
                    if self.limiter.acquire_or_cancel(cancel).await.is_none() {
                        return Err(FetchError::Cancelled);
                    }
                    debug!(symbol = %symbol, attempt, "fetching quote");
                    match tokio::time::timeout(self.config.request_timeout, self.source.fetch(symbol))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(self.config.request_timeout)),
                    }
                },
                FetchError::is_transient,
                budget,
            )
            .await;

        let raw = match fetched {
            Ok(raw) => raw,
            Err(RetryError::Permanent {
                attempts: 1,
                error: FetchError::Cancelled,
            }) => return None,
            Err(error) => return Some(fetch_failure(symbol, error)),
        };

        let record = match self.validator.validate(raw) {
            Ok(record) => record,
            Err(rejection) => {
                warn!(symbol = %symbol, reason = %rejection.reason, detail = %rejection.detail, "quote rejected");
                return Some(SymbolOutcome::Failed(SymbolFailure::new(
                    symbol,
                    FailureKind::ValidationRejected,
                    rejection.to_string(),
                    1,
                )));
            }
        };

        let record = &record;
        let stored = self
            .retry
            .run(
                move |_| self.storage.upsert(record),
                StorageError::is_transient,
                budget,
            )
            .await;

        match stored {
            Ok(ack) => {
                debug!(symbol = %symbol, key = %ack.key, outcome = ?ack.outcome, "quote stored");
                Some(SymbolOutcome::Stored {
                    symbol: symbol.clone(),
                    ack,
                })
            }
            Err(error) => {
                warn!(symbol = %symbol, attempts = error.attempts(), error = %error, "storage failed");
                Some(SymbolOutcome::Failed(SymbolFailure::new(
                    symbol,
                    FailureKind::StorageFailed,
                    error.error().to_string(),
                    error.attempts(),
                )))
            }
        }
    }
}

fn fetch_failure(symbol: &Symbol, error: RetryError<FetchError>) -> SymbolOutcome {
    let attempts = error.attempts();
    let (kind, reason) = match &error {
        RetryError::Permanent {
            error: FetchError::Cancelled,
            ..
        } => (
            FailureKind::FetchExhausted,
            String::from("cancelled while waiting to retry"),
        ),
        RetryError::Permanent { error, .. } => (FailureKind::FetchPermanent, error.to_string()),
        RetryError::Exhausted { last, .. } => (FailureKind::FetchExhausted, last.to_string()),
        RetryError::Interrupted { last, .. } => (
            FailureKind::FetchExhausted,
            format!("cancelled during backoff: {last}"),
        ),
    };

    warn!(symbol = %symbol, attempts, reason = %reason, ?kind, "fetch failed");
    SymbolOutcome::Failed(SymbolFailure::new(symbol, kind, reason, attempts))
}

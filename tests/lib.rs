//! Shared fixtures for the behaviour tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use quotesync_core::{
    Ack, FetchError, MemoryStore, OrchestratorConfig, QuoteSource, RawQuote, RetryConfig,
    StorageError, StorageWriter, Symbol, SyntheticQuoteSource, UtcDateTime, ValidatedRecord,
};

pub fn symbols(names: &[&str]) -> Vec<Symbol> {
    names
        .iter()
        .map(|name| Symbol::parse(name).expect("valid test symbol"))
        .collect()
}

pub fn symbol(name: &str) -> Symbol {
    Symbol::parse(name).expect("valid test symbol")
}

/// No pacing and a generous budget so tests only see the behaviour under test.
pub fn fast_orchestrator_config(max_symbols_per_batch: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_symbols_per_batch,
        concurrency: 1,
        request_timeout: Duration::from_secs(5),
        request_delay: Duration::ZERO,
        cycle_budget: Duration::from_secs(600),
    }
}

pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::fixed(Duration::from_millis(10), max_retries)
}

type Scripted = Result<RawQuote, FetchError>;

/// Replays scripted responses per symbol, then falls back to synthetic
/// quotes. Counts every fetch.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<Symbol, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<Symbol, u32>>,
    latency: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(self, name: &str, responses: Vec<Scripted>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(symbol(name), responses.into());
        self
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls
            .lock()
            .expect("calls lock")
            .get(&symbol(name))
            .copied()
            .unwrap_or(0)
    }
}

impl QuoteSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<RawQuote, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            *self
                .calls
                .lock()
                .expect("calls lock")
                .entry(symbol.clone())
                .or_default() += 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let scripted = self
                .scripts
                .lock()
                .expect("scripts lock")
                .get_mut(symbol)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| Ok(SyntheticQuoteSource::quote_at(symbol, UtcDateTime::now())))
        })
    }
}

/// A [`MemoryStore`] whose first `failures` writes fail transiently.
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

impl StorageWriter for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn upsert<'a>(
        &'a self,
        record: &'a ValidatedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError::Transient(String::from("connection reset")));
            }
            self.inner.upsert(record).await
        })
    }

    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        self.inner.ping()
    }
}

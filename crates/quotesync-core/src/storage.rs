//! Idempotent persistence of validated quotes.
//!
//! Records are keyed by `(symbol, observed_at)`. Writing the same record
//! twice leaves the store exactly as one write would, which is what makes
//! retrying an ambiguous storage failure safe.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use quotesync_warehouse::{QuoteRow, UpsertOutcome, Warehouse, WarehouseError};
use thiserror::Error;
use tracing::debug;

use crate::{Symbol, UtcDateTime, ValidatedRecord};

/// Market label stored with every warehouse row.
pub const DEFAULT_MARKET: &str = "NASDAQ";

/// Acknowledgement of a successful upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub key: String,
    pub outcome: UpsertOutcome,
}

/// Storage failure, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage rejected record: {0}")]
    Permanent(String),
}

impl StorageError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<WarehouseError> for StorageError {
    fn from(error: WarehouseError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else {
            Self::Permanent(error.to_string())
        }
    }
}

/// The `upsert(record) -> Ack` collaborator of the orchestrator.
pub trait StorageWriter: Send + Sync {
    fn name(&self) -> &'static str;

    fn upsert<'a>(
        &'a self,
        record: &'a ValidatedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, StorageError>> + Send + 'a>>;

    /// Connectivity probe used by the health command.
    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;
}

/// Writes into the DuckDB warehouse on tokio's blocking pool.
#[derive(Clone)]
pub struct WarehouseWriter {
    warehouse: Warehouse,
    market: String,
}

impl WarehouseWriter {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            market: DEFAULT_MARKET.to_owned(),
        }
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = market.into();
        self
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl StorageWriter for WarehouseWriter {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    fn upsert<'a>(
        &'a self,
        record: &'a ValidatedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let row = quote_row(record, &self.market);
            let warehouse = self.warehouse.clone();
            let outcome = tokio::task::spawn_blocking(move || warehouse.upsert_quote(&row))
                .await
                .map_err(|e| StorageError::Permanent(format!("warehouse task failed: {e}")))??;

            debug!(key = %record.key(), ?outcome, "warehouse upsert");
            Ok(Ack {
                key: record.key(),
                outcome,
            })
        })
    }

    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let warehouse = self.warehouse.clone();
            tokio::task::spawn_blocking(move || warehouse.ping())
                .await
                .map_err(|e| StorageError::Transient(format!("warehouse task failed: {e}")))??;
            Ok(())
        })
    }
}

/// Convert a validated record into the warehouse row layout.
pub fn quote_row(record: &ValidatedRecord, market: &str) -> QuoteRow {
    QuoteRow {
        symbol: record.symbol().to_string(),
        observed_at: record.observed_at().format_rfc3339(),
        price: record.price(),
        volume: record.volume(),
        open: record.open(),
        high: record.high(),
        low: record.low(),
        previous_close: record.previous_close(),
        change: record.change(),
        change_percent: record.change_percent(),
        market: market.to_owned(),
        market_state: record.market_state().map(|state| state.as_str().to_owned()),
    }
}

/// In-process store used by tests and `--dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(Symbol, UtcDateTime), ValidatedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .expect("memory store lock is not poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, symbol: &Symbol, observed_at: UtcDateTime) -> Option<ValidatedRecord> {
        self.records
            .lock()
            .expect("memory store lock is not poisoned")
            .get(&(symbol.clone(), observed_at))
            .cloned()
    }

    /// Every stored record, ordered by key.
    pub fn snapshot(&self) -> Vec<ValidatedRecord> {
        self.records
            .lock()
            .expect("memory store lock is not poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn put(&self, record: &ValidatedRecord) -> UpsertOutcome {
        let mut records = self
            .records
            .lock()
            .expect("memory store lock is not poisoned");
        let key = (record.symbol().clone(), record.observed_at());
        match records.get(&key) {
            Some(existing) if existing == record => UpsertOutcome::Unchanged,
            Some(_) => {
                records.insert(key, record.clone());
                UpsertOutcome::Replaced
            }
            None => {
                records.insert(key, record.clone());
                UpsertOutcome::Inserted
            }
        }
    }
}

impl StorageWriter for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn upsert<'a>(
        &'a self,
        record: &'a ValidatedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let outcome = self.put(record);
            Ok(Ack {
                key: record.key(),
                outcome,
            })
        })
    }

    fn ping<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

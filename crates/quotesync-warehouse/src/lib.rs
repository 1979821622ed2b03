//! # quotesync warehouse
//!
//! DuckDB-backed key-value store for validated quote observations.
//!
//! Every observation is keyed by `(symbol, observed_at)`. Writes go through
//! [`Warehouse::upsert_quote`], which compares against the stored row and only
//! rewrites it when a field differs, so replaying the same observation (for
//! example after a lost acknowledgement) leaves the table untouched.
//!
//! ```rust,no_run
//! use quotesync_warehouse::{QuoteRow, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     let row = QuoteRow {
//!         symbol: "AAPL".to_string(),
//!         observed_at: "2024-01-02T15:30:00Z".to_string(),
//!         price: 185.2,
//!         volume: 1_200_000,
//!         open: None,
//!         high: None,
//!         low: None,
//!         previous_close: None,
//!         change: None,
//!         change_percent: None,
//!         market: "NASDAQ".to_string(),
//!         market_state: None,
//!     };
//!     warehouse.upsert_quote(&row)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `quotes` | One row per `(symbol, observed_at)` |
//! | `schema_migrations` | Applied migration versions |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `v_latest_quotes` | Newest observation per symbol |

pub mod duckdb;
pub mod migrations;
pub mod views;

use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, OptionalExt, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

const QUOTE_COLUMNS: &str = "symbol, strftime(observed_at, '%Y-%m-%dT%H:%M:%SZ'), price, volume, \
     open, high, low, previous_close, change, change_percent, market, market_state";

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The row cannot be stored as given.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl WarehouseError {
    /// Whether retrying the same call may succeed.
    ///
    /// File-system problems and lock/interrupt failures reported by `DuckDB` are
    /// treated as transient; everything else is a property of the data or schema.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::InvalidRecord(_) => false,
            Self::DuckDb(error) => {
                let text = error.to_string().to_ascii_lowercase();
                ["lock", "io error", "could not open", "interrupt", "busy"]
                    .iter()
                    .any(|needle| text.contains(needle))
            }
        }
    }
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data").join("quotes.duckdb"),
            max_pool_size: 4,
        }
    }
}

/// A stored quote observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRow {
    pub symbol: String,
    /// RFC3339 UTC timestamp with whole-second precision.
    pub observed_at: String,
    pub price: f64,
    pub volume: u64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub market: String,
    pub market_state: Option<String>,
}

/// What an upsert did to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row existed for the key.
    Inserted,
    /// A row existed with different values and was overwritten.
    Replaced,
    /// An identical row already existed; nothing was written.
    Unchanged,
}

/// Summary of the quote table.
#[derive(Debug, Clone, Serialize)]
pub struct WarehouseStats {
    pub location: Option<PathBuf>,
    pub row_count: u64,
    pub symbol_count: u64,
    pub latest_observed_at: Option<String>,
}

/// The main warehouse interface.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse file, creating parent directories and schema as needed.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Open a throwaway in-memory warehouse.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let manager = DuckDbConnectionManager::open_in_memory(2)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply migrations and create views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    /// Database file location; `None` when in memory.
    pub fn location(&self) -> Option<&Path> {
        self.manager.location()
    }

    /// Cheap connectivity probe.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let one: i64 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
        if one == 1 {
            Ok(())
        } else {
            Err(WarehouseError::InvalidRecord(String::from(
                "connectivity probe returned an unexpected value",
            )))
        }
    }

    /// Insert or overwrite the row stored under `(symbol, observed_at)`.
    ///
    /// Identical rows are detected and skipped, so repeating a call with the
    /// same record is observably a no-op.
    pub fn upsert_quote(&self, row: &QuoteRow) -> Result<UpsertOutcome, WarehouseError> {
        if row.symbol.trim().is_empty() {
            return Err(WarehouseError::InvalidRecord(String::from(
                "symbol must not be empty",
            )));
        }
        if !row.price.is_finite() {
            return Err(WarehouseError::InvalidRecord(format!(
                "price for {} must be finite",
                row.symbol
            )));
        }
        let volume = i64::try_from(row.volume).map_err(|_| {
            WarehouseError::InvalidRecord(format!("volume for {} overflows BIGINT", row.symbol))
        })?;

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<UpsertOutcome, WarehouseError> {
            let existing = select_quote(&connection, &row.symbol, &row.observed_at)?;
            let outcome = match existing {
                Some(stored) if stored == *row => return Ok(UpsertOutcome::Unchanged),
                Some(_) => UpsertOutcome::Replaced,
                None => UpsertOutcome::Inserted,
            };

            let params: [&dyn ToSql; 12] = [
                &row.symbol,
                &row.observed_at,
                &row.price,
                &volume,
                &row.open,
                &row.high,
                &row.low,
                &row.previous_close,
                &row.change,
                &row.change_percent,
                &row.market,
                &row.market_state,
            ];
            connection.execute(
                "INSERT OR REPLACE INTO quotes \
                 (symbol, observed_at, price, volume, open, high, low, previous_close, \
                  change, change_percent, market, market_state) \
                 VALUES (?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params.as_slice(),
            )?;

            Ok(outcome)
        })();

        finalize_transaction(&connection, result)
    }

    /// Fetch the row stored under an exact key.
    pub fn get_quote(
        &self,
        symbol: &str,
        observed_at: &str,
    ) -> Result<Option<QuoteRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        select_quote(&connection, symbol, observed_at)
    }

    /// Newest stored observation for a symbol.
    pub fn latest_quote(&self, symbol: &str) -> Result<Option<QuoteRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM v_latest_quotes WHERE symbol = ?");
        let row = connection
            .query_row(sql.as_str(), params![symbol], read_quote_row)
            .optional()?;
        Ok(row)
    }

    /// Row and symbol counts for health reporting.
    pub fn stats(&self) -> Result<WarehouseStats, WarehouseError> {
        let connection = self.manager.acquire()?;
        let (row_count, symbol_count, latest): (i64, i64, Option<String>) = connection.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT symbol), \
             strftime(MAX(observed_at), '%Y-%m-%dT%H:%M:%SZ') FROM quotes",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(WarehouseStats {
            location: self.location().map(Path::to_path_buf),
            row_count: u64::try_from(row_count).unwrap_or(0),
            symbol_count: u64::try_from(symbol_count).unwrap_or(0),
            latest_observed_at: latest,
        })
    }
}

fn select_quote(
    connection: &Connection,
    symbol: &str,
    observed_at: &str,
) -> Result<Option<QuoteRow>, WarehouseError> {
    let sql = format!(
        "SELECT {QUOTE_COLUMNS} FROM quotes \
         WHERE symbol = ? AND observed_at = CAST(? AS TIMESTAMP)"
    );
    let params: [&dyn ToSql; 2] = [&symbol, &observed_at];
    let row = connection
        .query_row(sql.as_str(), params.as_slice(), read_quote_row)
        .optional()?;
    Ok(row)
}

fn read_quote_row(row: &::duckdb::Row<'_>) -> Result<QuoteRow, ::duckdb::Error> {
    let volume: i64 = row.get(3)?;
    Ok(QuoteRow {
        symbol: row.get(0)?,
        observed_at: row.get(1)?,
        price: row.get(2)?,
        volume: u64::try_from(volume).unwrap_or(0),
        open: row.get(4)?,
        high: row.get(5)?,
        low: row.get(6)?,
        previous_close: row.get(7)?,
        change: row.get(8)?,
        change_percent: row.get(9)?,
        market: row.get(10)?,
        market_state: row.get(11)?,
    })
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

//! # Quotesync Core
//!
//! Scraping engine for the quotesync market-data collector.
//!
//! ## Overview
//!
//! One process periodically pulls the latest quote for a fixed universe of
//! ticker symbols, checks each quote, and upserts it into the warehouse.
//! This crate holds everything between the symbol list and the database:
//!
//! - **Domain types** for symbols, timestamps, raw and validated quotes
//! - **Rate limiting** with a sliding window and per-request pacing
//! - **Retry** with exponential backoff, jitter and a cycle budget
//! - **Validation** of price, volume, timestamp and day range
//! - **Storage** writers for the warehouse and for tests
//! - **Orchestration** of batches into a per-cycle report
//! - **Health** tracking and **scheduling** with graceful shutdown
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`circuit_breaker`] | Circuit breaker around the upstream quote API |
//! | [`config`] | Environment-driven runtime configuration |
//! | [`domain`] | Symbol, timestamp and quote types |
//! | [`error`] | Core error types |
//! | [`health`] | Cycle-driven health state machine |
//! | [`http_client`] | HTTP client abstraction |
//! | [`orchestrator`] | Batch processing and cycle results |
//! | [`retry`] | Backoff and retry policy |
//! | [`scheduler`] | Interval loop and shutdown handling |
//! | [`source`] | Quote sources (HTTP and synthetic) |
//! | [`storage`] | Storage writers |
//! | [`symbols`] | Symbol universe file handling |
//! | [`throttling`] | Sliding-window rate limiter and request pacer |
//! | [`validation`] | Quote sanity checks |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quotesync_core::{
//!     BatchOrchestrator, HealthMonitor, MemoryStore, Scheduler, ScraperConfig,
//!     SyntheticQuoteSource, Symbol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScraperConfig::from_env()?;
//!     let orchestrator = BatchOrchestrator::new(
//!         Arc::new(SyntheticQuoteSource::new()),
//!         Arc::new(MemoryStore::new()),
//!         config.orchestrator_config(),
//!     );
//!     let scheduler = Scheduler::new(
//!         orchestrator,
//!         HealthMonitor::new(config.health_config()),
//!         vec![Symbol::parse("AAPL")?],
//!         config.schedule_config(),
//!     );
//!     let report = scheduler.run_once(std::future::pending()).await;
//!     println!("{:?}", report.last_cycle);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Scheduler     │──────▶ HealthMonitor
//! └────────┬────────┘
//!          │ one cycle per interval
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Orchestrator    │────▶│ RateLimiter      │
//! │                 │────▶│ RetryPolicy      │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ QuoteSource     │────▶│ HTTP Client      │
//! └────────┬────────┘     └──────────────────┘
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Validator       │────▶│ StorageWriter    │
//! └─────────────────┘     └──────────────────┘
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod symbols;
pub mod throttling;
pub mod validation;

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Configuration
pub use config::{LogFormat, ScraperConfig, DEFAULT_QUOTE_SOURCE_URL};

// Domain models
pub use domain::{MarketState, RawQuote, Symbol, UtcDateTime, ValidatedRecord};

// Error types
pub use error::{ConfigError, CoreError, ValidationError};

// Health
pub use health::{HealthConfig, HealthMonitor, HealthState, HealthStatus};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
};

// Orchestration
pub use orchestrator::{
    BatchOrchestrator, CycleResult, FailureKind, FailureStage, OrchestratorConfig, SymbolFailure,
    SymbolOutcome,
};

// Retry logic
pub use retry::{
    Backoff, RetryBudget, RetryConfig, RetryError, RetryPolicy, SPENT_BUDGET_BACKOFF,
};

// Scheduling
pub use scheduler::{ScheduleConfig, Scheduler, ShutdownReport};

// Quote sources
pub use source::{FetchError, HttpQuoteSource, QuoteSource, SyntheticQuoteSource};

// Storage
pub use storage::{Ack, MemoryStore, StorageError, StorageWriter, WarehouseWriter};

// Symbol universe
pub use symbols::{SymbolUniverse, NASDAQ_100};

// Throttling
pub use throttling::{Permit, RateLimiter, RequestPacer};

// Validation
pub use validation::{Rejection, RejectionReason, ValidationBounds, Validator};

// Warehouse (re-exported from quotesync-warehouse)
pub use quotesync_warehouse::{
    QuoteRow, UpsertOutcome, Warehouse, WarehouseConfig, WarehouseError, WarehouseStats,
};

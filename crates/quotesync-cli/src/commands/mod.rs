mod daemon;
mod health;
mod init_symbols;
mod once;

use std::collections::HashMap;
use std::sync::Arc;

use quotesync_core::{
    BatchOrchestrator, HealthMonitor, HttpQuoteSource, MemoryStore, QuoteSource, Scheduler,
    ScraperConfig, StorageWriter, Symbol, SymbolUniverse, SyntheticQuoteSource, WarehouseWriter,
};
use quotesync_warehouse::{Warehouse, WarehouseConfig};
use tracing::info;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli, config: &ScraperConfig) -> Result<(), CliError> {
    match cli.resolved_command() {
        Command::Daemon => daemon::run(cli, config).await,
        Command::Once(args) => once::run(cli, config, &args).await,
        Command::Health(args) => health::run(cli, config, &args).await,
        Command::InitSymbols(args) => init_symbols::run(config, &args),
    }
}

/// Environment configuration with command-line flags layered on top.
pub fn load_config(cli: &Cli) -> Result<ScraperConfig, CliError> {
    Ok(ScraperConfig::from_env_with_overrides(&flag_overrides(cli))?)
}

fn flag_overrides(cli: &Cli) -> HashMap<&'static str, String> {
    let mut overrides = HashMap::new();
    if cli.debug {
        overrides.insert("DEBUG", String::from("true"));
    }
    if let Some(level) = &cli.log_level {
        overrides.insert("LOG_LEVEL", level.clone());
    }
    if let Some(path) = &cli.symbols_file {
        overrides.insert("NASDAQ_SYMBOLS_FILE", path.display().to_string());
    }
    overrides
}

/// The symbol universe, truncated to one batch in debug mode.
pub fn load_symbols(config: &ScraperConfig) -> Result<Vec<Symbol>, CliError> {
    let mut universe = SymbolUniverse::load(&config.symbols_file)?;
    if config.debug {
        universe = universe.truncate(config.max_symbols_per_batch);
    }
    info!(
        path = %config.symbols_file.display(),
        symbols = universe.len(),
        debug = config.debug,
        "symbol universe loaded"
    );
    Ok(universe.symbols().to_vec())
}

pub fn build_source(cli: &Cli, config: &ScraperConfig) -> Arc<dyn QuoteSource> {
    if cli.mock {
        info!("using synthetic quote source");
        Arc::new(SyntheticQuoteSource::new())
    } else {
        Arc::new(HttpQuoteSource::new(
            config.quote_source_url.clone(),
            config.request_timeout,
        ))
    }
}

pub fn build_storage(cli: &Cli, config: &ScraperConfig) -> Result<Arc<dyn StorageWriter>, CliError> {
    if cli.dry_run {
        info!("dry run: quotes are kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let warehouse = Warehouse::open(WarehouseConfig {
        db_path: config.warehouse_path.clone(),
        ..WarehouseConfig::default()
    })?;
    info!(path = %config.warehouse_path.display(), "warehouse opened");
    Ok(Arc::new(WarehouseWriter::new(warehouse)))
}

pub fn build_scheduler(
    cli: &Cli,
    config: &ScraperConfig,
    symbols: Vec<Symbol>,
) -> Result<Scheduler, CliError> {
    let orchestrator = BatchOrchestrator::new(
        build_source(cli, config),
        build_storage(cli, config)?,
        config.orchestrator_config(),
    )
    .with_rate_limiter(Arc::new(config.rate_limiter()))
    .with_retry_config(config.retry_config())
    .with_validator(config.validator());

    Ok(Scheduler::new(
        orchestrator,
        HealthMonitor::new(config.health_config()),
        symbols,
        config.schedule_config(),
    ))
}

/// Resolves on SIGINT, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!(signal = "SIGINT", "shutdown signal received"),
        _ = terminate => info!(signal = "SIGTERM", "shutdown signal received"),
    }
}

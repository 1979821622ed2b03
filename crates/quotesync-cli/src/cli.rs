//! CLI argument definitions for quotesync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `daemon` | Run scrape cycles until SIGINT/SIGTERM (default) |
//! | `once` | Run a single cycle and print its report |
//! | `health` | Check storage, symbol universe and quote source |
//! | `init-symbols` | Write the bundled NASDAQ-100 symbol file |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--debug` | `false` | Debug mode: fewer symbols, verbose logging |
//! | `--log-level` | `LOG_LEVEL` | Log verbosity override |
//! | `--symbols-file` | `NASDAQ_SYMBOLS_FILE` | Symbol universe path |
//! | `--mock` | `false` | Use synthetic quotes instead of the network |
//! | `--dry-run` | `false` | Keep results in memory instead of the warehouse |
//!
//! # Examples
//!
//! ```bash
//! # Run forever with the environment's configuration
//! quotesync
//!
//! # One offline cycle, nothing written to disk
//! quotesync once --mock --dry-run --pretty
//!
//! # Bootstrap the symbol file
//! quotesync init-symbols
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// quotesync - periodic market quote collector
#[derive(Debug, Parser)]
#[command(
    name = "quotesync",
    author,
    version,
    about = "Periodic market quote collector",
    long_about = "quotesync pulls the latest quote for every symbol in a fixed universe on a \
fixed interval, validates each quote and upserts it into a local DuckDB warehouse.\n\
\n\
Configuration is read from the environment (and .env); flags override it."
)]
pub struct Cli {
    /// Debug mode: limits the symbol count and logs verbosely.
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Path to the symbol universe JSON file.
    #[arg(long, global = true)]
    pub symbols_file: Option<PathBuf>,

    /// Use deterministic synthetic quotes instead of the network.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Store results in memory only.
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Daemon)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run scrape cycles until interrupted.
    Daemon,
    /// Run one cycle and print the cycle report as JSON.
    Once(ReportArgs),
    /// Check storage, symbol universe and quote source.
    Health(ReportArgs),
    /// Write the bundled NASDAQ-100 list to the symbols file.
    InitSymbols(InitSymbolsArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ReportArgs {
    /// Pretty-print the JSON report.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Args)]
pub struct InitSymbolsArgs {
    /// Overwrite an existing file.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

use quotesync_core::ScraperConfig;
use tracing::info;

use crate::cli::Cli;
use crate::error::CliError;

use super::{build_scheduler, load_symbols, shutdown_signal};

pub async fn run(cli: &Cli, config: &ScraperConfig) -> Result<(), CliError> {
    let symbols = load_symbols(config)?;
    let scheduler = build_scheduler(cli, config, symbols)?;

    info!(
        interval_secs = config.scrape_interval.as_secs_f64(),
        mock = cli.mock,
        dry_run = cli.dry_run,
        "daemon starting"
    );
    let report = scheduler.run(shutdown_signal()).await;

    let health = scheduler.health().status();
    info!(
        cycles_run = report.cycles_run,
        clean = report.clean,
        health = %health.summary(),
        "daemon stopped"
    );

    if report.clean {
        Ok(())
    } else {
        Err(CliError::UncleanShutdown)
    }
}

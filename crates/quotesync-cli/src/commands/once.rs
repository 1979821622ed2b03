use quotesync_core::ScraperConfig;

use crate::cli::{Cli, ReportArgs};
use crate::error::CliError;
use crate::output::render_json;

use super::{build_scheduler, load_symbols, shutdown_signal};

/// Minimum share of attempted symbols that must be stored for a zero exit.
const SUCCESS_THRESHOLD: f64 = 0.8;

pub async fn run(cli: &Cli, config: &ScraperConfig, args: &ReportArgs) -> Result<(), CliError> {
    let symbols = load_symbols(config)?;
    let scheduler = build_scheduler(cli, config, symbols)?;

    let report = scheduler.run_once(shutdown_signal()).await;
    if !report.clean {
        return Err(CliError::UncleanShutdown);
    }
    let Some(cycle) = report.last_cycle else {
        return Err(CliError::UncleanShutdown);
    };

    render_json(&cycle, args.pretty)?;

    let rate = cycle.success_rate();
    if rate < SUCCESS_THRESHOLD {
        return Err(CliError::LowSuccessRate {
            rate: rate * 100.0,
            threshold: SUCCESS_THRESHOLD * 100.0,
        });
    }
    Ok(())
}

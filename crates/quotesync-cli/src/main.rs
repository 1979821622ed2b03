mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::cli::Cli;
use crate::error::CliError;

/// How long blocking work (an in-flight warehouse write) may hold the
/// process after the command has returned.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::from)
        .and_then(|runtime| block_on_bounded(runtime, run(), RUNTIME_SHUTDOWN_TIMEOUT));

    match outcome {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, exit_code = error.exit_code(), "quotesync failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Drive `future` to completion, then give blocking tasks at most `grace`
/// before the runtime is torn down without them.
fn block_on_bounded<F: Future>(runtime: Runtime, future: F, grace: Duration) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    output
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let config = commands::load_config(&cli)?;
    logging::init(&config)?;
    for issue in config.ensure_valid()? {
        tracing::warn!(issue = %issue, "configuration issue tolerated in debug mode");
    }

    commands::run(&cli, &config).await?;
    Ok(ExitCode::SUCCESS)
}

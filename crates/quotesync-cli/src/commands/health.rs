use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use quotesync_core::{ScraperConfig, Symbol, SymbolUniverse};

use crate::cli::{Cli, ReportArgs};
use crate::error::CliError;
use crate::output::render_json;

use super::{build_source, build_storage};

const PROBE_SYMBOL: &str = "AAPL";

#[derive(Debug, Serialize)]
struct HealthCheck {
    name: &'static str,
    passed: bool,
    detail: String,
    latency_ms: u64,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    healthy: bool,
    checks: Vec<HealthCheck>,
}

impl HealthCheck {
    fn new(name: &'static str, started: Instant, outcome: Result<String, String>) -> Self {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (passed, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(detail) => (false, detail),
        };
        if passed {
            info!(check = name, detail = %detail, latency_ms, "health check passed");
        } else {
            warn!(check = name, detail = %detail, latency_ms, "health check failed");
        }
        Self {
            name,
            passed,
            detail,
            latency_ms,
        }
    }
}

pub async fn run(cli: &Cli, config: &ScraperConfig, args: &ReportArgs) -> Result<(), CliError> {
    let mut checks = Vec::with_capacity(3);

    let started = Instant::now();
    let storage = match build_storage(cli, config) {
        Ok(storage) => match storage.ping().await {
            Ok(()) => Ok(format!("{} reachable", storage.name())),
            Err(error) => Err(error.to_string()),
        },
        Err(error) => Err(error.to_string()),
    };
    checks.push(HealthCheck::new("storage", started, storage));

    let started = Instant::now();
    let universe = SymbolUniverse::load(&config.symbols_file);
    let probe = universe
        .as_ref()
        .ok()
        .and_then(|universe| universe.symbols().first().cloned());
    let outcome = universe
        .map(|universe| format!("{} symbols", universe.len()))
        .map_err(|error| error.to_string());
    checks.push(HealthCheck::new("symbols", started, outcome));

    let started = Instant::now();
    let source = build_source(cli, config);
    let outcome = match probe.map_or_else(|| Symbol::parse(PROBE_SYMBOL), Ok) {
        Ok(symbol) => {
            match tokio::time::timeout(config.request_timeout, source.fetch(&symbol)).await {
                Ok(Ok(raw)) => match config.validator().validate(raw) {
                    Ok(record) => Ok(format!(
                        "{} {symbol} = {:.2}",
                        source.name(),
                        record.price()
                    )),
                    Err(rejection) => Err(format!("{symbol}: {rejection}")),
                },
                Ok(Err(error)) => Err(format!("{symbol}: {error}")),
                Err(_) => Err(format!(
                    "{symbol}: no response within {:.1}s",
                    config.request_timeout.as_secs_f64()
                )),
            }
        }
        Err(error) => Err(error.to_string()),
    };
    checks.push(HealthCheck::new("source", started, outcome));

    let failed = checks.iter().filter(|check| !check.passed).count();
    let total = checks.len();
    render_json(
        &HealthReport {
            healthy: failed == 0,
            checks,
        },
        args.pretty,
    )?;

    if failed == 0 {
        Ok(())
    } else {
        Err(CliError::HealthCheckFailed { failed, total })
    }
}

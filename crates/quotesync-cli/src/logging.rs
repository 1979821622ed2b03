//! Tracing subscriber setup.

use quotesync_core::{LogFormat, ScraperConfig};
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// `RUST_LOG` wins when set; otherwise the configured level applies to the
/// quotesync crates and `warn` to everything else.
pub fn filter_directives(config: &ScraperConfig) -> String {
    if let Ok(value) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !value.trim().is_empty() {
            return value;
        }
    }

    let level = if config.debug {
        "debug"
    } else {
        normalize_level(&config.log_level)
    };
    format!("warn,quotesync={level},quotesync_core={level},quotesync_warehouse={level}")
}

/// Accepts the usual spellings (`WARNING`, `CRITICAL`) next to tracing's own.
fn normalize_level(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

pub fn init(config: &ScraperConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(filter_directives(config))
        .map_err(|error| CliError::Logging(error.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|error| CliError::Logging(error.to_string()))
}

//! Runtime configuration read once from the environment.
//!
//! Every variable has a default. `.env` files in the working directory are
//! honoured. Values that cannot be parsed are fatal; values that parse but
//! look unreasonable are reported by [`ScraperConfig::validate`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::health::HealthConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::scheduler::ScheduleConfig;
use crate::throttling::RateLimiter;
use crate::validation::{ValidationBounds, Validator};
use crate::ConfigError;

pub const DEFAULT_QUOTE_SOURCE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Every tunable of the scraper.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperConfig {
    pub debug: bool,
    pub log_level: String,
    pub log_format: LogFormat,
    pub scrape_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_max_delay: Duration,
    pub request_delay: Duration,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub max_symbols_per_batch: usize,
    pub fetch_concurrency: usize,
    pub health_check_interval: Duration,
    pub graceful_shutdown_timeout: Duration,
    pub health_failure_threshold: f64,
    pub health_unhealthy_after: u32,
    pub health_lookback_cycles: u32,
    pub min_price: f64,
    pub max_price: f64,
    pub min_volume: u64,
    pub clock_skew_tolerance: Duration,
    pub home: PathBuf,
    pub symbols_file: PathBuf,
    pub warehouse_path: PathBuf,
    pub quote_source_url: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None).expect("built-in defaults must parse")
    }
}

impl ScraperConfig {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_overrides(&HashMap::new())
    }

    /// Like [`Self::from_env`], but `overrides` win over the environment.
    /// The CLI uses this for flags such as `--debug`.
    pub fn from_env_with_overrides(
        overrides: &HashMap<&'static str, String>,
    ) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| {
            overrides
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        })
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let debug = vars.flag("DEBUG")?;
        let home = PathBuf::from(vars.string("QUOTESYNC_HOME", "./data"));
        let warehouse_path = vars
            .raw("WAREHOUSE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("quotes.duckdb"));
        let log_format = match vars.string("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidVar {
                    name: "LOG_FORMAT",
                    value: other.to_owned(),
                    reason: String::from("expected 'text' or 'json'"),
                })
            }
        };

        Ok(Self {
            debug,
            log_level: vars.string("LOG_LEVEL", if debug { "debug" } else { "info" }),
            log_format,
            scrape_interval: vars.seconds("SCRAPE_INTERVAL", if debug { 300.0 } else { 60.0 })?,
            request_timeout: vars.seconds("REQUEST_TIMEOUT", 10.0)?,
            max_retries: vars.number("MAX_RETRIES", 3)?,
            retry_delay: vars.seconds("RETRY_DELAY", 2.0)?,
            retry_max_delay: vars.seconds("RETRY_MAX_DELAY", 60.0)?,
            request_delay: vars.seconds("REQUEST_DELAY", 2.0)?,
            rate_limit_requests: vars.number("RATE_LIMIT_REQUESTS", 30)?,
            rate_limit_window: vars.seconds("RATE_LIMIT_WINDOW", 60.0)?,
            max_symbols_per_batch: vars.number("MAX_SYMBOLS_PER_BATCH", if debug { 5 } else { 100 })?,
            fetch_concurrency: vars.number("FETCH_CONCURRENCY", 1)?,
            health_check_interval: vars.seconds("HEALTH_CHECK_INTERVAL", 300.0)?,
            graceful_shutdown_timeout: vars.seconds("GRACEFUL_SHUTDOWN_TIMEOUT", 30.0)?,
            health_failure_threshold: vars.number("HEALTH_FAILURE_THRESHOLD", 0.2)?,
            health_unhealthy_after: vars.number("HEALTH_UNHEALTHY_AFTER", 5)?,
            health_lookback_cycles: vars.number("HEALTH_LOOKBACK_CYCLES", 5)?,
            min_price: vars.number("MIN_PRICE", 0.01)?,
            max_price: vars.number("MAX_PRICE", 10_000.0)?,
            min_volume: vars.number("MIN_VOLUME", 0)?,
            clock_skew_tolerance: vars.seconds("CLOCK_SKEW_TOLERANCE", 300.0)?,
            symbols_file: PathBuf::from(vars.string("NASDAQ_SYMBOLS_FILE", "data/symbols.json")),
            warehouse_path,
            home,
            quote_source_url: vars.string("QUOTE_SOURCE_URL", DEFAULT_QUOTE_SOURCE_URL),
        })
    }

    /// Human-readable list of suspicious settings. Empty when all is well.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.scrape_interval < Duration::from_secs(30) {
            issues.push(String::from("SCRAPE_INTERVAL too low (minimum 30 seconds)"));
        }
        if self.request_timeout < Duration::from_secs(5) {
            issues.push(String::from("REQUEST_TIMEOUT too low (minimum 5 seconds)"));
        }
        if !(1..=10).contains(&self.max_retries) {
            issues.push(String::from("MAX_RETRIES should be between 1 and 10"));
        }
        if self.rate_limit_requests < 1 {
            issues.push(String::from("RATE_LIMIT_REQUESTS must be positive"));
        }
        if self.rate_limit_window.is_zero() {
            issues.push(String::from("RATE_LIMIT_WINDOW must be positive"));
        }
        if self.retry_delay.is_zero() {
            issues.push(String::from("RETRY_DELAY must be positive"));
        }
        if self.max_symbols_per_batch < 1 {
            issues.push(String::from("MAX_SYMBOLS_PER_BATCH must be positive"));
        }
        if self.fetch_concurrency < 1 {
            issues.push(String::from("FETCH_CONCURRENCY must be positive"));
        }
        if self.min_price > self.max_price {
            issues.push(format!(
                "MIN_PRICE ({}) is greater than MAX_PRICE ({})",
                self.min_price, self.max_price
            ));
        }
        if !(0.0..=1.0).contains(&self.health_failure_threshold) {
            issues.push(String::from("HEALTH_FAILURE_THRESHOLD must be between 0 and 1"));
        }
        if self.health_unhealthy_after < 1 {
            issues.push(String::from("HEALTH_UNHEALTHY_AFTER must be positive"));
        }

        issues
    }

    /// Fail on [`Self::validate`] issues unless running in debug mode.
    pub fn ensure_valid(&self) -> Result<Vec<String>, ConfigError> {
        let issues = self.validate();
        if issues.is_empty() || self.debug {
            Ok(issues)
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit_requests.max(1), self.rate_limit_window)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: self.retry_delay,
                factor: 2.0,
                max: self.retry_max_delay,
                jitter: true,
            },
        }
    }

    pub fn validator(&self) -> Validator {
        Validator::new(ValidationBounds {
            min_price: self.min_price,
            max_price: self.max_price,
            min_volume: self.min_volume,
            clock_skew_tolerance: self.clock_skew_tolerance,
        })
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            failure_threshold: self.health_failure_threshold,
            unhealthy_after: self.health_unhealthy_after.max(1),
            lookback_cycles: self.health_lookback_cycles.max(1),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_symbols_per_batch: self.max_symbols_per_batch.max(1),
            concurrency: self.fetch_concurrency.max(1),
            request_timeout: self.request_timeout,
            request_delay: self.request_delay,
            cycle_budget: self.scrape_interval,
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: self.scrape_interval,
            graceful_shutdown_timeout: self.graceful_shutdown_timeout,
            health_check_interval: self.health_check_interval,
        }
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name)
            .map(|value| value.trim().to_owned())
            .unwrap_or_else(|| default.to_owned())
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        let Some(value) = self.raw(name) else {
            return Ok(false);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidVar {
                name,
                value,
                reason: String::from("expected true or false"),
            }),
        }
    }

    fn number<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.raw(name) else {
            return Ok(default);
        };
        value
            .trim()
            .parse::<T>()
            .map_err(|error| ConfigError::InvalidVar {
                name,
                value,
                reason: error.to_string(),
            })
    }

    fn seconds(&self, name: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let seconds: f64 = self.number(name, default)?;
        Duration::try_from_secs_f64(seconds).map_err(|error| ConfigError::InvalidVar {
            name,
            value: seconds.to_string(),
            reason: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ScraperConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        ScraperConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = from_pairs(&[]).expect("defaults parse");

        assert!(!config.debug);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.scrape_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.request_delay, Duration::from_secs(2));
        assert_eq!(config.rate_limit_requests, 30);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.max_symbols_per_batch, 100);
        assert_eq!(config.health_check_interval, Duration::from_secs(300));
        assert_eq!(config.graceful_shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.min_price, 0.01);
        assert_eq!(config.max_price, 10_000.0);
        assert_eq!(config.min_volume, 0);
        assert_eq!(config.symbols_file, PathBuf::from("data/symbols.json"));
        assert_eq!(config.warehouse_path, PathBuf::from("./data").join("quotes.duckdb"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn debug_mode_changes_defaults_but_not_explicit_values() {
        let config = from_pairs(&[("DEBUG", "True"), ("SCRAPE_INTERVAL", "45")]).expect("parse");

        assert!(config.debug);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scrape_interval, Duration::from_secs(45));
        assert_eq!(config.max_symbols_per_batch, 5);
    }

    #[test]
    fn fractional_seconds_are_accepted() {
        let config = from_pairs(&[("REQUEST_DELAY", "0.25"), ("RATE_LIMIT_WINDOW", "1.5")])
            .expect("parse");

        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert_eq!(config.rate_limit_window, Duration::from_millis(1500));
    }

    #[test]
    fn unparsable_values_are_errors() {
        let err = from_pairs(&[("MAX_RETRIES", "three")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidVar { name: "MAX_RETRIES", .. }));

        let err = from_pairs(&[("RETRY_DELAY", "-1")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidVar { name: "RETRY_DELAY", .. }));

        let err = from_pairs(&[("DEBUG", "maybe")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidVar { name: "DEBUG", .. }));
    }

    #[test]
    fn validate_reports_every_issue_and_debug_tolerates_them() {
        let strict = from_pairs(&[
            ("SCRAPE_INTERVAL", "5"),
            ("MAX_RETRIES", "0"),
            ("MIN_PRICE", "50"),
            ("MAX_PRICE", "10"),
        ])
        .expect("parse");

        let issues = strict.validate();
        assert_eq!(issues.len(), 3, "{issues:?}");
        assert!(matches!(strict.ensure_valid(), Err(ConfigError::Invalid { .. })));

        let relaxed = ScraperConfig {
            debug: true,
            ..strict
        };
        assert_eq!(relaxed.ensure_valid().expect("debug tolerates").len(), 3);
    }
}

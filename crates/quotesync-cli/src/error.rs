use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] quotesync_core::ConfigError),

    #[error(transparent)]
    Core(#[from] quotesync_core::CoreError),

    #[error("failed to initialise logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Warehouse(#[from] quotesync_warehouse::WarehouseError),

    #[error("symbols file {} already exists (use --force to overwrite)", .0.display())]
    SymbolsFileExists(std::path::PathBuf),

    #[error("cycle success rate {rate:.1}% is below {threshold:.0}%")]
    LowSuccessRate { rate: f64, threshold: f64 },

    #[error("health check failed: {failed} of {total} checks did not pass")]
    HealthCheckFailed { failed: usize, total: usize },

    #[error("shutdown was not clean: in-flight cycle was aborted")]
    UncleanShutdown,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Logging(_) | Self::SymbolsFileExists(_) => 2,
            Self::Core(quotesync_core::CoreError::Config(_)) => 2,
            Self::LowSuccessRate { .. } | Self::HealthCheckFailed { .. } => 3,
            Self::UncleanShutdown => 4,
            Self::Serialization(_) => 5,
            Self::Core(_) | Self::Warehouse(_) | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::CliError;
    use quotesync_core::ConfigError;

    #[test]
    fn startup_failures_map_to_distinct_codes() {
        let config = CliError::from(ConfigError::NoValidSymbols {
            path: PathBuf::from("data/symbols.json"),
        });
        let io = CliError::from(std::io::Error::other("disk full"));

        assert_eq!(config.exit_code(), 2);
        assert_eq!(io.exit_code(), 10);
        assert_eq!(CliError::UncleanShutdown.exit_code(), 4);
        assert_eq!(
            CliError::LowSuccessRate {
                rate: 50.0,
                threshold: 80.0
            }
            .exit_code(),
            3
        );
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Validation and contract errors for core domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },
}

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name}='{value}' is invalid: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("configuration is invalid: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },

    #[error("symbols file not found: {}", path.display())]
    SymbolsFileMissing { path: PathBuf },

    #[error("failed to read symbols file {}: {source}", path.display())]
    SymbolsFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("symbols file {} is not valid JSON: {source}", path.display())]
    SymbolsFileJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("symbols file {} has an unsupported shape: {detail}", path.display())]
    SymbolsFileShape { path: PathBuf, detail: String },

    #[error("symbols file {} contains no valid symbols", path.display())]
    NoValidSymbols { path: PathBuf },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Static symbol universe loaded once at startup.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{ConfigError, CoreError, Symbol, UtcDateTime};

/// NASDAQ-100 constituents written by `quotesync init-symbols`.
pub const NASDAQ_100: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "TSLA", "META", "NVDA", "AVGO", "ASML", "COST",
    "NFLX", "ADBE", "PEP", "TMUS", "CSCO", "ORCL", "CRM", "ACN", "INTC", "AMD", "QCOM", "TXN",
    "INTU", "CMCSA", "AMGN", "HON", "AMAT", "PANW", "VRTX", "ADI", "GILD", "BKNG", "MU", "ADP",
    "LRCX", "SBUX", "MELI", "KLAC", "MDLZ", "SNPS", "CDNS", "REGN", "PYPL", "FTNT", "MAR", "MRVL",
    "ORLY", "CSX", "DASH", "ADSK", "ABNB", "ROP", "NXPI", "WDAY", "CPRT", "MNST", "FANG", "AEP",
    "ROST", "KDP", "PAYX", "ODFL", "FAST", "BKR", "EA", "DDOG", "VRSK", "XEL", "CTSH", "GEHC",
    "KHC", "LULU", "TEAM", "CSGP", "IDXX", "ANSS", "ZS", "DXCM", "CCEP", "BIIB", "TTWO", "PCAR",
    "ON", "CRWD", "CDW", "WBD", "GFS", "ILMN", "MDB", "WBA", "MRNA", "ARM", "SMCI",
];

/// Ordered, de-duplicated list of symbols scraped every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolUniverse {
    symbols: Vec<Symbol>,
}

impl SymbolUniverse {
    /// Build a universe from already-parsed symbols, dropping duplicates.
    pub fn new(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let mut seen = HashSet::new();
        let symbols = symbols
            .into_iter()
            .filter(|symbol| seen.insert(symbol.clone()))
            .collect();
        Self { symbols }
    }

    /// Load a symbols file.
    ///
    /// Accepted shapes: a JSON array of strings, an object with a `symbols` or
    /// `data` array, or an object whose keys are the symbols. Invalid entries
    /// are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::SymbolsFileMissing {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::SymbolsFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::SymbolsFileJson {
                path: path.to_path_buf(),
                source,
            })?;

        let entries = extract_entries(&document).map_err(|detail| ConfigError::SymbolsFileShape {
            path: path.to_path_buf(),
            detail,
        })?;

        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            match Symbol::parse(&entry) {
                Ok(symbol) => parsed.push(symbol),
                Err(error) => warn!(entry = %entry, %error, "skipping invalid symbol"),
            }
        }

        let universe = Self::new(parsed);
        if universe.is_empty() {
            return Err(ConfigError::NoValidSymbols {
                path: path.to_path_buf(),
            });
        }

        info!(count = universe.len(), path = %path.display(), "loaded symbol universe");
        Ok(universe)
    }

    /// Write the bundled NASDAQ-100 list, creating parent directories.
    pub fn write_default(path: &Path) -> Result<usize, CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = json!({
            "description": "NASDAQ-100 Stock Symbols",
            "last_updated": UtcDateTime::now().truncate_to_seconds().format_rfc3339(),
            "count": NASDAQ_100.len(),
            "symbols": NASDAQ_100,
        });
        fs::write(path, serde_json::to_string_pretty(&document)?)?;

        info!(count = NASDAQ_100.len(), path = %path.display(), "wrote default symbol universe");
        Ok(NASDAQ_100.len())
    }

    /// Keep only the first `limit` symbols.
    #[must_use]
    pub fn truncate(mut self, limit: usize) -> Self {
        self.symbols.truncate(limit.max(1));
        self
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn extract_entries(document: &Value) -> Result<Vec<String>, String> {
    let array_entries = |values: &[Value]| -> Result<Vec<String>, String> {
        values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| format!("expected string entries, found {value}"))
            })
            .collect()
    };

    match document {
        Value::Array(values) => array_entries(values),
        Value::Object(map) => match (map.get("symbols"), map.get("data")) {
            (Some(Value::Array(values)), _) => array_entries(values),
            (None, Some(Value::Array(values))) => array_entries(values),
            (Some(other), _) | (None, Some(other)) => {
                Err(format!("expected an array of symbols, found {other}"))
            }
            (None, None) => Ok(map.keys().cloned().collect()),
        },
        other => Err(format!("expected an array or object, found {other}")),
    }
}

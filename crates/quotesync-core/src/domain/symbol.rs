use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 10;

/// Normalized ticker, e.g. `AAPL` or `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, upper-case and check a raw ticker: 1 to 10 characters, a leading
    /// ASCII letter, then letters, digits, `.` or `-`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();

        let mut chars = normalized.chars().enumerate();
        match chars.next() {
            None => return Err(ValidationError::EmptySymbol),
            Some((_, ch)) if !ch.is_ascii_alphabetic() => {
                return Err(ValidationError::SymbolInvalidStart { ch })
            }
            Some(_) => {}
        }
        if let Some((index, ch)) =
            chars.find(|&(_, ch)| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-')))
        {
            return Err(ValidationError::SymbolInvalidChar { ch, index });
        }

        // ASCII only past this point, so bytes == chars.
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len: normalized.len(),
                max: MAX_SYMBOL_LEN,
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::{Symbol, UtcDateTime};

/// Trading session the quote was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    PreMarket,
    Regular,
    PostMarket,
    Closed,
}

impl MarketState {
    /// Map the upstream `marketState` strings (`PRE`, `REGULAR`, `POST`, ...).
    pub fn from_upstream(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PRE" | "PREPRE" => Some(Self::PreMarket),
            "REGULAR" => Some(Self::Regular),
            "POST" | "POSTPOST" => Some(Self::PostMarket),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreMarket => "pre_market",
            Self::Regular => "regular",
            Self::PostMarket => "post_market",
            Self::Closed => "closed",
        }
    }
}

impl Display for MarketState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unchecked output of a quote source. Every numeric field may be missing or
/// out of range; [`crate::Validator`] decides whether it is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub symbol: Symbol,
    pub price: Option<f64>,
    pub volume: Option<i64>,
    pub observed_at: Option<UtcDateTime>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub market_state: Option<MarketState>,
}

impl RawQuote {
    pub fn new(
        symbol: Symbol,
        price: Option<f64>,
        volume: Option<i64>,
        observed_at: Option<UtcDateTime>,
    ) -> Self {
        Self {
            symbol,
            price,
            volume,
            observed_at,
            open: None,
            high: None,
            low: None,
            previous_close: None,
            change: None,
            change_percent: None,
            market_state: None,
        }
    }

    pub fn with_day_range(mut self, open: f64, high: f64, low: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self
    }

    pub fn with_previous_close(mut self, previous_close: f64) -> Self {
        self.previous_close = Some(previous_close);
        self
    }

    pub fn with_change(mut self, change: f64, change_percent: f64) -> Self {
        self.change = Some(change);
        self.change_percent = Some(change_percent);
        self
    }

    pub fn with_market_state(mut self, market_state: MarketState) -> Self {
        self.market_state = Some(market_state);
        self
    }
}

/// A quote that passed every validator check. Only the validator builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    symbol: Symbol,
    price: f64,
    volume: u64,
    observed_at: UtcDateTime,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    previous_close: Option<f64>,
    change: Option<f64>,
    change_percent: Option<f64>,
    market_state: Option<MarketState>,
}

impl ValidatedRecord {
    /// Assemble a record from checked parts, filling in the daily change when
    /// the source only reported a previous close.
    pub(crate) fn from_checked(
        raw: RawQuote,
        price: f64,
        volume: u64,
        observed_at: UtcDateTime,
    ) -> Self {
        let (change, change_percent) =
            derive_change(price, raw.previous_close, raw.change, raw.change_percent);

        Self {
            symbol: raw.symbol,
            price,
            volume,
            observed_at: observed_at.truncate_to_seconds(),
            open: raw.open,
            high: raw.high,
            low: raw.low,
            previous_close: raw.previous_close,
            change,
            change_percent,
            market_state: raw.market_state,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn observed_at(&self) -> UtcDateTime {
        self.observed_at
    }

    pub fn open(&self) -> Option<f64> {
        self.open
    }

    pub fn high(&self) -> Option<f64> {
        self.high
    }

    pub fn low(&self) -> Option<f64> {
        self.low
    }

    pub fn previous_close(&self) -> Option<f64> {
        self.previous_close
    }

    pub fn change(&self) -> Option<f64> {
        self.change
    }

    pub fn change_percent(&self) -> Option<f64> {
        self.change_percent
    }

    pub fn market_state(&self) -> Option<MarketState> {
        self.market_state
    }

    /// Storage key rendered as `SYMBOL@timestamp`.
    pub fn key(&self) -> String {
        format!("{}@{}", self.symbol, self.observed_at)
    }
}

fn derive_change(
    price: f64,
    previous_close: Option<f64>,
    change: Option<f64>,
    change_percent: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let usable_close = previous_close.filter(|close| *close > 0.0);

    match (change, change_percent, usable_close) {
        (Some(change), Some(percent), _) => (Some(change), Some(percent)),
        (None, Some(percent), Some(close)) => (Some(percent * close / 100.0), Some(percent)),
        (Some(change), None, Some(close)) => (Some(change), Some(change * 100.0 / close)),
        (None, None, Some(close)) => {
            let change = price - close;
            (Some(change), Some(change * 100.0 / close))
        }
        (change, percent, None) => (change, percent),
    }
}

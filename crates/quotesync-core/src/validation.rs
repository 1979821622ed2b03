//! Sanity checks between fetch and storage.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::{RawQuote, UtcDateTime, ValidatedRecord};

/// Bounds applied by [`Validator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationBounds {
    pub min_price: f64,
    pub max_price: f64,
    pub min_volume: u64,
    pub clock_skew_tolerance: Duration,
}

impl Default for ValidationBounds {
    fn default() -> Self {
        Self {
            min_price: 0.01,
            max_price: 10_000.0,
            min_volume: 0,
            clock_skew_tolerance: Duration::from_secs(300),
        }
    }
}

/// Why a quote was refused. Each check has its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingPrice,
    PriceOutOfRange,
    MissingVolume,
    VolumeBelowMinimum,
    MissingTimestamp,
    TimestampInFuture,
    InvertedDayRange,
    NegativeField,
}

impl RejectionReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingPrice => "missing_price",
            Self::PriceOutOfRange => "price_out_of_range",
            Self::MissingVolume => "missing_volume",
            Self::VolumeBelowMinimum => "volume_below_minimum",
            Self::MissingTimestamp => "missing_timestamp",
            Self::TimestampInFuture => "timestamp_in_future",
            Self::InvertedDayRange => "inverted_day_range",
            Self::NegativeField => "negative_field",
        }
    }
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed validation: the reason code plus a readable detail.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}: {detail}")]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Pure, I/O-free quote checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    bounds: ValidationBounds,
}

impl Validator {
    pub fn new(bounds: ValidationBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &ValidationBounds {
        &self.bounds
    }

    /// Validate against the current wall clock.
    pub fn validate(&self, raw: RawQuote) -> Result<ValidatedRecord, Rejection> {
        self.validate_at(raw, UtcDateTime::now())
    }

    /// Validate as if the current time were `now`. Checks run in order and
    /// stop at the first failure: price, volume, timestamp, optional fields.
    pub fn validate_at(
        &self,
        raw: RawQuote,
        now: UtcDateTime,
    ) -> Result<ValidatedRecord, Rejection> {
        let bounds = &self.bounds;

        let price = raw
            .price
            .ok_or_else(|| Rejection::new(RejectionReason::MissingPrice, "no price reported"))?;
        if !price.is_finite() || price < bounds.min_price || price > bounds.max_price {
            return Err(Rejection::new(
                RejectionReason::PriceOutOfRange,
                format!(
                    "price {price} outside [{}, {}]",
                    bounds.min_price, bounds.max_price
                ),
            ));
        }

        let volume = raw
            .volume
            .ok_or_else(|| Rejection::new(RejectionReason::MissingVolume, "no volume reported"))?;
        let volume = u64::try_from(volume)
            .ok()
            .filter(|volume| *volume >= bounds.min_volume)
            .ok_or_else(|| {
                Rejection::new(
                    RejectionReason::VolumeBelowMinimum,
                    format!("volume {volume} below minimum {}", bounds.min_volume),
                )
            })?;

        let observed_at = raw.observed_at.ok_or_else(|| {
            Rejection::new(RejectionReason::MissingTimestamp, "no observation time")
        })?;
        if observed_at > now.saturating_add(bounds.clock_skew_tolerance) {
            return Err(Rejection::new(
                RejectionReason::TimestampInFuture,
                format!(
                    "observed at {observed_at}, more than {}s ahead of {now}",
                    bounds.clock_skew_tolerance.as_secs()
                ),
            ));
        }

        check_optional_fields(&raw)?;

        Ok(ValidatedRecord::from_checked(raw, price, volume, observed_at))
    }
}

fn check_optional_fields(raw: &RawQuote) -> Result<(), Rejection> {
    let fields = [
        ("open", raw.open),
        ("high", raw.high),
        ("low", raw.low),
        ("previous_close", raw.previous_close),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(Rejection::new(
                    RejectionReason::NegativeField,
                    format!("{name} must be a finite, non-negative number, got {value}"),
                ));
            }
        }
    }

    if let (Some(high), Some(low)) = (raw.high, raw.low) {
        if high < low {
            return Err(Rejection::new(
                RejectionReason::InvertedDayRange,
                format!("day high {high} below day low {low}"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-03-01T15:00:00Z").expect("timestamp")
    }

    fn quote(price: Option<f64>, volume: Option<i64>) -> RawQuote {
        RawQuote::new(
            Symbol::parse("MSFT").expect("symbol"),
            price,
            volume,
            Some(now()),
        )
    }

    fn reason(raw: RawQuote) -> RejectionReason {
        Validator::default()
            .validate_at(raw, now())
            .expect_err("must be rejected")
            .reason
    }

    #[test]
    fn price_bounds_are_inclusive() {
        let validator = Validator::default();

        assert_eq!(reason(quote(Some(0.0), Some(1))), RejectionReason::PriceOutOfRange);
        assert!(validator.validate_at(quote(Some(0.01), Some(1)), now()).is_ok());
        assert!(validator.validate_at(quote(Some(10_000.0), Some(1)), now()).is_ok());
        assert_eq!(
            reason(quote(Some(10_000.01), Some(1))),
            RejectionReason::PriceOutOfRange
        );
        assert_eq!(reason(quote(Some(f64::NAN), Some(1))), RejectionReason::PriceOutOfRange);
    }

    #[test]
    fn missing_fields_have_distinct_codes() {
        assert_eq!(reason(quote(None, Some(1))), RejectionReason::MissingPrice);
        assert_eq!(reason(quote(Some(1.0), None)), RejectionReason::MissingVolume);
        assert_eq!(reason(quote(Some(1.0), Some(-5))), RejectionReason::VolumeBelowMinimum);

        let mut undated = quote(Some(1.0), Some(1));
        undated.observed_at = None;
        assert_eq!(reason(undated), RejectionReason::MissingTimestamp);
    }

    #[test]
    fn checks_short_circuit_in_order() {
        let mut raw = quote(Some(0.0), None);
        raw.observed_at = None;
        assert_eq!(reason(raw), RejectionReason::PriceOutOfRange);
    }

    #[test]
    fn future_timestamps_respect_skew_tolerance() {
        let validator = Validator::default();

        let mut near = quote(Some(1.0), Some(1));
        near.observed_at = Some(UtcDateTime::parse("2024-03-01T15:05:00Z").expect("ts"));
        assert!(validator.validate_at(near, now()).is_ok());

        let mut far = quote(Some(1.0), Some(1));
        far.observed_at = Some(UtcDateTime::parse("2024-03-01T15:05:01Z").expect("ts"));
        assert_eq!(reason(far), RejectionReason::TimestampInFuture);
    }

    #[test]
    fn optional_fields_must_be_consistent() {
        let inverted = quote(Some(10.0), Some(1)).with_day_range(10.0, 9.0, 11.0);
        assert_eq!(reason(inverted), RejectionReason::InvertedDayRange);

        let negative = quote(Some(10.0), Some(1)).with_previous_close(-1.0);
        assert_eq!(reason(negative), RejectionReason::NegativeField);

        let fine = quote(Some(10.0), Some(1)).with_day_range(9.5, 11.0, 9.0);
        assert!(Validator::default().validate_at(fine, now()).is_ok());
    }

    #[test]
    fn volume_minimum_is_configurable() {
        let validator = Validator::new(ValidationBounds {
            min_volume: 100,
            ..ValidationBounds::default()
        });

        let err = validator
            .validate_at(quote(Some(1.0), Some(99)), now())
            .expect_err("too thin");
        assert_eq!(err.reason, RejectionReason::VolumeBelowMinimum);
        assert_eq!(err.reason.code(), "volume_below_minimum");
    }
}

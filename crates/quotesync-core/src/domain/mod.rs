//! # Domain Models
//!
//! Value types that flow through one scraping cycle.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated, upper-cased ticker |
//! | [`UtcDateTime`] | RFC3339 UTC timestamp |
//! | [`RawQuote`] | Unchecked output of a quote source |
//! | [`ValidatedRecord`] | A quote that passed every sanity check |
//!
//! `ValidatedRecord` has no public constructor outside this crate; the only
//! way to obtain one is [`crate::Validator::validate`].

mod quote;
mod symbol;
mod timestamp;

pub use quote::{MarketState, RawQuote, ValidatedRecord};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;

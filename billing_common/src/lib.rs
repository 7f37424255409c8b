//! Shared building blocks for the billing workspace.
//!
//! Nothing in here performs I/O. The crate carries the money type used by every other layer, a wrapper that keeps
//! secrets out of logs, and a couple of helpers for reading configuration flags.
mod cents;
mod currency;
pub mod helpers;
pub mod op;
mod secret;

pub use cents::{Cents, CentsConversionError};
pub use currency::{normalize_currency, validate_positive_amount, AmountError, DEFAULT_CURRENCY};
pub use secret::Secret;

//! Data types shared by the store, the gateway engine and the public API.
//!
//! Statuses are closed enumerations stored as lower snake-case text. Parsing an unknown value fails with
//! [`ConversionError`], which the API layer reports as an invalid argument.
use serde_json::Value;
use thiserror::Error;

/// Declares a closed status enumeration with its canonical text form.
///
/// Generates `as_str`, `Display`, `FromStr` (case-insensitive, trimmed), and serde/sqlx impls that use the text form.
#[macro_export]
macro_rules! text_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, sqlx::Type)]
        $vis enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] #[sqlx(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::db_types::ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err($crate::db_types::ConversionError::new(stringify!($name), s)),
                }
            }
        }
    };
}

mod accounts;
mod catalog;
mod coupons;
mod orders;
mod subscriptions;

pub use accounts::*;
pub use catalog::*;
pub use coupons::*;
pub use orders::*;
pub use subscriptions::*;

/// Free-form JSON object attached to orders, payments, refunds and ledger rows.
pub type Metadata = serde_json::Map<String, Value>;

/// Shallow merge: every top-level key in `patch` overwrites the same key in `base`.
pub fn merge_metadata(base: &mut Metadata, patch: Metadata) {
    for (k, v) in patch {
        base.insert(k, v);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: '{value}'")]
pub struct ConversionError {
    pub kind: &'static str,
    pub value: String,
}

impl ConversionError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    #[test]
    fn enums_round_trip_through_text() {
        assert_eq!(OrderStatus::from_str("Partially_Refunded").unwrap(), OrderStatus::PartiallyRefunded);
        assert_eq!(OrderStatus::PendingPayment.to_string(), "pending_payment");
        assert_eq!(serde_json::to_string(&PaymentStatus::Succeeded).unwrap(), "\"succeeded\"");
        let err = PaymentMethod::from_str("crypto").unwrap_err();
        assert_eq!(err.kind, "PaymentMethod");
    }

    #[test]
    fn merge_overwrites_top_level_keys() {
        let mut base = json!({"a": 1, "b": {"x": 1}}).as_object().cloned().unwrap();
        let patch = json!({"b": {"y": 2}, "c": "new"}).as_object().cloned().unwrap();
        merge_metadata(&mut base, patch);
        assert_eq!(Value::Object(base), json!({"a": 1, "b": {"y": 2}, "c": "new"}));
    }
}

use thiserror::Error;

use crate::Cents;

/// Used when neither the billing option, the plan nor the user's balance names a currency.
pub const DEFAULT_CURRENCY: &str = "CNY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Currency code '{0}' is not a valid ISO-4217 style code")]
    InvalidCurrency(String),
    #[error("Amount must be positive, got {0}")]
    NotPositive(i64),
}

/// Trims and upper-cases a currency code. Codes must be 3 ASCII letters.
pub fn normalize_currency(code: &str) -> Result<String, AmountError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AmountError::InvalidCurrency(code.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn validate_positive_amount(amount: Cents) -> Result<Cents, AmountError> {
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(AmountError::NotPositive(amount.value()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn currency_is_upper_cased() {
        assert_eq!(normalize_currency(" cny ").unwrap(), "CNY");
        assert_eq!(normalize_currency("Usd").unwrap(), "USD");
    }

    #[test]
    fn bad_currency_codes_are_rejected() {
        assert!(normalize_currency("").is_err());
        assert!(normalize_currency("US").is_err());
        assert!(normalize_currency("U$D").is_err());
        assert!(normalize_currency("EURO").is_err());
    }

    #[test]
    fn positive_amounts() {
        assert!(validate_positive_amount(Cents::from(1)).is_ok());
        assert_eq!(validate_positive_amount(Cents::from(0)), Err(AmountError::NotPositive(0)));
        assert_eq!(validate_positive_amount(Cents::from(-3)), Err(AmountError::NotPositive(-3)));
    }
}

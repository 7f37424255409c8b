use billing_common::Cents;
use thiserror::Error;

use crate::db_types::ConversionError;

/// Failures at the store boundary. Backends translate their driver errors into these variants so that callers never
/// see driver types.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    Conflict(String),
    #[error("Reference to a missing row: {0}")]
    InvalidReference(String),
    #[error("Invalid value: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Transition not allowed: {0}")]
    InvalidTransition(String),
    #[error("Insufficient balance. Required {required}, available {available}")]
    InsufficientBalance { required: Cents, available: Cents },
    #[error("Database error: {0}")]
    Driver(String),
}

impl From<ConversionError> for StoreError {
    fn from(e: ConversionError) -> Self {
        StoreError::Driver(format!("Could not decode stored value. {e}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Driver(format!("Could not decode stored JSON. {e}"))
    }
}

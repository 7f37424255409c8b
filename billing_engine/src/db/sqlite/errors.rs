use log::*;
use sqlx::error::ErrorKind;

use crate::db::errors::StoreError;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row".to_string()),
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => StoreError::Conflict(db_err.message().to_string()),
                ErrorKind::ForeignKeyViolation => StoreError::InvalidReference(db_err.message().to_string()),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                    StoreError::InvalidArgument(db_err.message().to_string())
                },
                _ => {
                    warn!("🗃️ Unexpected database error: {e}");
                    StoreError::Driver(e.to_string())
                },
            },
            _ => StoreError::Driver(e.to_string()),
        }
    }
}

/// True if `e` is a unique-index violation that mentions `column`.
pub(crate) fn is_unique_violation_on(e: &sqlx::Error, column: &str) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation() && db_err.message().contains(column),
        _ => false,
    }
}

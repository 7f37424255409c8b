use billing_common::{AmountError, Cents};
use log::*;
use thiserror::Error;

use crate::{
    coupons::CouponError,
    db::errors::StoreError,
    db_types::ConversionError,
    gateway::GatewayError,
    provisioning::ProvisioningError,
};

/// The error taxonomy of the order flow API. Everything the engine can fail with is folded into one of these.
#[derive(Debug, Clone, Error)]
pub enum BillingError {
    #[error("Invalid request: {0}")]
    InvalidArgument(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Insufficient balance. Required {required}, available {available}")]
    InsufficientBalance { required: Cents, available: Cents },
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for BillingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(s) => Self::Conflict(s),
            StoreError::InvalidReference(s) | StoreError::InvalidArgument(s) => Self::InvalidArgument(s),
            StoreError::NotFound(s) => Self::NotFound(s),
            StoreError::InvalidTransition(s) => Self::InvalidState(s),
            StoreError::InsufficientBalance { required, available } => {
                Self::InsufficientBalance { required, available }
            },
            StoreError::Driver(s) => {
                error!("🔄️ Store failure: {s}");
                Self::Backend(s)
            },
        }
    }
}

impl From<GatewayError> for BillingError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidSignature => Self::Unauthorized,
            e if e.is_remote() => Self::Gateway(e.to_string()),
            e => Self::InvalidArgument(e.to_string()),
        }
    }
}

impl From<CouponError> for BillingError {
    fn from(e: CouponError) -> Self {
        match e {
            CouponError::Store(e) => e.into(),
            e => Self::InvalidArgument(e.to_string()),
        }
    }
}

impl From<ProvisioningError> for BillingError {
    fn from(e: ProvisioningError) -> Self {
        match e {
            ProvisioningError::OrderNotFound(id) => Self::NotFound(format!("Order {id}")),
            ProvisioningError::NotPaid(id) => Self::InvalidState(format!("Order {id} is not paid")),
            e @ ProvisioningError::InvalidPlan { .. } => Self::InvalidArgument(e.to_string()),
            ProvisioningError::Store(e) => e.into(),
        }
    }
}

impl From<ConversionError> for BillingError {
    fn from(e: ConversionError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<AmountError> for BillingError {
    fn from(e: AmountError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        assert!(matches!(BillingError::from(StoreError::Conflict("k".into())), BillingError::Conflict(_)));
        assert!(matches!(
            BillingError::from(StoreError::InvalidReference("user".into())),
            BillingError::InvalidArgument(_)
        ));
        assert!(matches!(
            BillingError::from(StoreError::InvalidTransition("x".into())),
            BillingError::InvalidState(_)
        ));
        assert!(matches!(BillingError::from(StoreError::Driver("io".into())), BillingError::Backend(_)));
    }

    #[test]
    fn gateway_errors_map_onto_the_taxonomy() {
        assert!(matches!(BillingError::from(GatewayError::InvalidSignature), BillingError::Unauthorized));
        assert!(matches!(BillingError::from(GatewayError::Timeout), BillingError::Gateway(_)));
        assert!(matches!(
            BillingError::from(GatewayError::Rejected("failed".into())),
            BillingError::InvalidArgument(_)
        ));
        assert!(matches!(BillingError::from(GatewayError::NotConfigured("refund")), BillingError::InvalidArgument(_)));
    }
}

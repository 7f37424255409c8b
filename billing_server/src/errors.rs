use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use billing_engine::BillingError;
use log::error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Could not issue access token. {0}")]
    CouldNotIssueAccessToken(String),
    #[error("{0}")]
    Billing(BillingError),
}

impl From<BillingError> for ServerError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Unauthorized => Self::Unauthorized,
            e => Self::Billing(e),
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CouldNotIssueAccessToken(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Billing(e) => match e {
                BillingError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                BillingError::Unauthorized => StatusCode::UNAUTHORIZED,
                BillingError::Forbidden(_) => StatusCode::FORBIDDEN,
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::Conflict(_) => StatusCode::CONFLICT,
                BillingError::InvalidState(_) => StatusCode::CONFLICT,
                BillingError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
                BillingError::Gateway(_) => StatusCode::BAD_GATEWAY,
                BillingError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("💻️ Request failed with {status}. {self}");
        }
        HttpResponse::build(status)
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

#[cfg(test)]
mod test {
    use billing_common::Cents;

    use super::*;

    #[test]
    fn billing_errors_map_to_status_codes() {
        let cases = [
            (BillingError::InvalidArgument("x".into()), 400),
            (BillingError::Unauthorized, 401),
            (BillingError::Forbidden("x".into()), 403),
            (BillingError::NotFound("Order 1".into()), 404),
            (BillingError::Conflict("x".into()), 409),
            (BillingError::InvalidState("x".into()), 409),
            (BillingError::InsufficientBalance { required: Cents::from(2), available: Cents::from(1) }, 402),
            (BillingError::TooManyRequests, 429),
            (BillingError::Gateway("x".into()), 502),
            (BillingError::Backend("x".into()), 500),
        ];
        for (e, code) in cases {
            assert_eq!(ServerError::from(e).status_code().as_u16(), code);
        }
    }

    #[test]
    fn unauthorized_body_has_no_detail() {
        let res = ServerError::from(BillingError::Unauthorized).error_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServerError::Unauthorized.to_string(), "Unauthorized");
        let not_found = ServerError::from(BillingError::NotFound("Order 7".into()));
        assert_eq!(not_found.to_string(), "Order 7 not found");
    }
}

//! Errors from the user-facing payment handlers.

use http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::{Currency, DomainError, ValidationError};

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Processor unknown or not configured.
    #[error("Payment method '{0}' is not available")]
    ProcessorUnavailable(String),

    #[error("Amount must be between {min} and {max} minor units")]
    AmountOutOfRange { min: i64, max: i64, actual: i64 },

    #[error("Currency {0} is not accepted by this payment method")]
    UnsupportedCurrency(Currency),

    /// Processor refused or did not answer. The intent is marked failed.
    #[error("Payment could not be started, please try again")]
    CheckoutFailed { retryable: bool },

    /// Unknown order, or an order owned by someone else.
    #[error("Payment not found")]
    NotFound,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Payment store unavailable")]
    Store(#[from] DomainError),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::ProcessorUnavailable(_) => StatusCode::NOT_FOUND,
            PaymentError::AmountOutOfRange { .. }
            | PaymentError::UnsupportedCurrency(_)
            | PaymentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::CheckoutFailed { retryable: true } => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::CheckoutFailed { retryable: false } => StatusCode::BAD_GATEWAY,
            PaymentError::NotFound => StatusCode::NOT_FOUND,
            PaymentError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ProcessorUnavailable(_) => "PROCESSOR_UNAVAILABLE",
            PaymentError::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            PaymentError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            PaymentError::CheckoutFailed { .. } => "CHECKOUT_FAILED",
            PaymentError::NotFound => "NOT_FOUND",
            PaymentError::Validation(_) => "VALIDATION_FAILED",
            PaymentError::Store(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ErrorCode;

    #[test]
    fn store_failure_hides_details() {
        let err = PaymentError::from(DomainError::new(ErrorCode::DatabaseError, "pool exhausted"));
        assert_eq!(err.to_string(), "Payment store unavailable");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn checkout_failure_status_depends_on_retryability() {
        assert_eq!(
            PaymentError::CheckoutFailed { retryable: true }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PaymentError::CheckoutFailed { retryable: false }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}

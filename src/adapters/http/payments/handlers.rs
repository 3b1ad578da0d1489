//! HTTP handlers for payment endpoints.

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::adapters::http::middleware::RequireAuth;
use crate::adapters::http::AppState;
use crate::application::handlers::settlement::{
    CheckPaymentStatusQuery, CreatePaymentIntentCommand, PaymentError,
};
use crate::domain::foundation::OrderId;

use super::dto::{CreatePaymentRequest, CreatePaymentResponse, ErrorResponse};

/// POST /payments - Open a checkout for the authenticated user
pub async fn create_payment(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, PaymentApiError> {
    let cmd = CreatePaymentIntentCommand {
        user,
        processor: request.processor,
        amount_minor: request.amount_minor,
        currency: request.currency,
        description: request.description,
        language: request.language,
        email: request.email,
    };

    let result = state.create_payment_intent.handle(cmd).await?;
    Ok((StatusCode::CREATED, Json(CreatePaymentResponse::from(result))))
}

/// GET /payments/:order_id - Public status of the user's own payment
pub async fn get_payment_status(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, PaymentApiError> {
    let order_id = OrderId::new(order_id).map_err(|_| PaymentError::NotFound)?;
    let view = state
        .check_payment_status
        .handle(CheckPaymentStatusQuery { user, order_id })
        .await?;
    Ok(Json(view))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Mapping
// ════════════════════════════════════════════════════════════════════════════════

/// API error wrapper for payment errors.
#[derive(Debug)]
pub struct PaymentApiError(PaymentError);

impl From<PaymentError> for PaymentApiError {
    fn from(err: PaymentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PaymentApiError {
    fn into_response(self) -> Response {
        if let PaymentError::Store(inner) = &self.0 {
            error!(error = %inner, "Payment store failure");
        }
        let status = self.0.status_code();
        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{DomainError, ErrorCode};

    #[test]
    fn store_error_maps_to_503_without_details() {
        let err = PaymentApiError::from(PaymentError::Store(DomainError::new(
            ErrorCode::DatabaseError,
            "connection refused on 10.0.0.5",
        )));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn amount_out_of_range_is_422() {
        let err = PaymentApiError::from(PaymentError::AmountOutOfRange {
            min: 10_000,
            max: 100_000,
            actual: 5,
        });
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

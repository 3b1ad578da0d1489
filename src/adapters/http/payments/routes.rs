//! Axum router for payment endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use crate::adapters::http::AppState;

use super::handlers::{create_payment, get_payment_status};

/// Payment routes. All require an authenticated user.
///
/// - `POST /payments` - Open a checkout
/// - `GET /payments/:order_id` - Status of one of the user's payments
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/:order_id", get(get_payment_status))
}

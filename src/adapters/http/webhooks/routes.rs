//! Axum router for inbound callbacks.
//!
//! Neither route uses session auth; each request is verified by signature.

use axum::{routing::post, Router};

use crate::adapters::http::AppState;

use super::handlers::{handle_gateway_webhook, handle_panel_webhook};

/// - `POST /webhooks/:processor` - Processor payment callbacks
/// - `POST /panel/webhook` - Provisioning panel events
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/:processor", post(handle_gateway_webhook))
        .route("/panel/webhook", post(handle_panel_webhook))
}

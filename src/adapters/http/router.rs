//! Top-level router and the tower middleware stack.

use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::middleware::auth_middleware;
use super::payments::payment_routes;
use super::webhooks::webhook_routes;
use super::AppState;

/// Body limit for every route. Raised to fit the panel limit so that the
/// panel endpoint can answer 413 itself.
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Builds the full application router.
///
/// ## User endpoints (Bearer session token)
/// - `POST /payments`
/// - `GET /payments/:order_id`
///
/// ## Callbacks (signature verified)
/// - `POST /webhooks/:processor`
/// - `POST /panel/webhook`
///
/// ## Operations
/// - `GET /health`
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let body_limit = DEFAULT_BODY_LIMIT.max(state.panel_verifier.max_body_bytes() + 1);

    let authed = payment_routes().layer(axum::middleware::from_fn_with_state(
        state.session_validator.clone(),
        auth_middleware,
    ));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .merge(webhook_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(body_limit))
                // Timeout needs a `Default` response body, so it stays inside the limit layer.
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// GET /health - Liveness and the processors this instance accepts
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let processors: Vec<&'static str> = state.gateways.processors().iter().map(|p| p.slug()).collect();
    Json(json!({ "status": "ok", "processors": processors }))
}

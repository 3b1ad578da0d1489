//! HTTP handlers for inbound callbacks.
//!
//! Both endpoints read the raw body: signatures are computed over the exact
//! bytes the sender transmitted.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::adapters::http::middleware::client_ip;
use crate::adapters::http::AppState;
use crate::adapters::panel::{PanelWebhookError, SIGNATURE_HEADER};
use crate::application::handlers::settlement::{GatewayWebhookError, HandleGatewayWebhookCommand};
use crate::application::handlers::subscription::SyncPanelEventCommand;
use crate::domain::foundation::Timestamp;
use crate::ports::WebhookAck;

// ════════════════════════════════════════════════════════════════════════════════
// Processor Webhooks
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/:processor - Verify and settle a processor callback
pub async fn handle_gateway_webhook(
    State(state): State<AppState>,
    Path(processor): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let source_ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr), state.trust_proxy_headers);
    let cmd = HandleGatewayWebhookCommand {
        processor_slug: processor.clone(),
        body: body.to_vec(),
        headers,
        source_ip,
    };

    match state.gateway_webhooks.handle(cmd).await {
        Ok(result) => {
            debug!(processor = %processor, outcome = result.outcome.label(), "Webhook processed");
            ack_response(result.ack)
        }
        Err(err) => GatewayWebhookApiError(err).into_response(),
    }
}

fn ack_response(ack: WebhookAck) -> Response {
    match ack {
        WebhookAck::Text(text) => (StatusCode::OK, text).into_response(),
        WebhookAck::Json(value) => (StatusCode::OK, Json(value)).into_response(),
    }
}

/// Rejections carry only a coarse code; the reason goes to the log.
pub struct GatewayWebhookApiError(GatewayWebhookError);

impl IntoResponse for GatewayWebhookApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            GatewayWebhookError::UnknownProcessor => "UNKNOWN_PROCESSOR",
            GatewayWebhookError::Verification(_) => "WEBHOOK_REJECTED",
            GatewayWebhookError::Settlement(err) => {
                error!(error = %err, "Settlement failed, processor will redeliver");
                "TEMPORARILY_UNAVAILABLE"
            }
        };
        (self.0.status_code(), Json(json!({ "status": "error", "code": code }))).into_response()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Panel Webhooks
// ════════════════════════════════════════════════════════════════════════════════

/// POST /panel/webhook - Apply a signed panel event to local subscriptions
pub async fn handle_panel_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let received_at = Timestamp::now();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let envelope = match state.panel_verifier.verify_and_parse(&body, signature) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, size = body.len(), "Panel webhook rejected");
            return PanelWebhookApiError(err).into_response();
        }
    };

    let event_name = envelope.event.clone().unwrap_or_default();
    match state
        .panel_events
        .handle(SyncPanelEventCommand { envelope, received_at })
        .await
    {
        Ok(result) => {
            info!(event = %event_name, processed = result.processed, "Panel webhook handled");
            (StatusCode::OK, Json(json!({ "status": "ok", "processed": result.processed })))
                .into_response()
        }
        Err(err) => {
            error!(event = %event_name, error = %err, "Panel webhook store failure");
            PanelWebhookApiError(PanelWebhookError::StoreUnavailable(err.to_string())).into_response()
        }
    }
}

pub struct PanelWebhookApiError(PanelWebhookError);

impl IntoResponse for PanelWebhookApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            PanelWebhookError::NotConfigured => "NOT_CONFIGURED",
            PanelWebhookError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            PanelWebhookError::EmptyPayload => "EMPTY_PAYLOAD",
            PanelWebhookError::MissingSignature | PanelWebhookError::InvalidSignature => {
                "INVALID_SIGNATURE"
            }
            PanelWebhookError::InvalidPayload(_) => "INVALID_PAYLOAD",
            PanelWebhookError::StoreUnavailable(_) => "TEMPORARILY_UNAVAILABLE",
        };
        (self.0.status_code(), Json(json!({ "status": "error", "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_ack_keeps_processor_body() {
        let response = ack_response(WebhookAck::Text("YES"));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn store_failure_asks_panel_to_retry() {
        let response =
            PanelWebhookApiError(PanelWebhookError::StoreUnavailable("pool".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unknown_processor_is_404() {
        let response = GatewayWebhookApiError(GatewayWebhookError::UnknownProcessor).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

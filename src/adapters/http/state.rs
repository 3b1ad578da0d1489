//! Shared state for the HTTP adapter.

use std::sync::Arc;

use crate::adapters::panel::PanelWebhookVerifier;
use crate::application::handlers::settlement::{
    CheckPaymentStatusHandler, CreatePaymentIntentHandler, HandleGatewayWebhookHandler,
};
use crate::application::handlers::subscription::SyncPanelEventHandler;
use crate::ports::{GatewayRegistry, SessionValidator};

/// Dependencies shared by every request.
///
/// Cloned per request; everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub gateways: GatewayRegistry,
    pub create_payment_intent: Arc<CreatePaymentIntentHandler>,
    pub check_payment_status: Arc<CheckPaymentStatusHandler>,
    pub gateway_webhooks: Arc<HandleGatewayWebhookHandler>,
    pub panel_verifier: Arc<PanelWebhookVerifier>,
    pub panel_events: Arc<SyncPanelEventHandler>,
    pub session_validator: Arc<dyn SessionValidator>,
    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
}

//! HandleGatewayWebhookHandler - verifies a processor callback and settles it.

use http::{HeaderMap, StatusCode};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::domain::settlement::{SettlementError, SettlementOutcome, Trigger};
use crate::ports::{GatewayRegistry, InboundWebhook, VerificationError, WebhookAck};

use super::SettlementEngine;

/// Raw callback as received over HTTP.
#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookCommand {
    pub processor_slug: String,
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    pub source_ip: Option<IpAddr>,
}

/// Processed callback and the body to answer with.
#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookResult {
    pub outcome: SettlementOutcome,
    pub ack: WebhookAck,
}

#[derive(Debug, Error)]
pub enum GatewayWebhookError {
    #[error("Unknown payment processor")]
    UnknownProcessor,

    #[error("Webhook rejected")]
    Verification(#[from] VerificationError),

    #[error("Temporarily unable to process webhook")]
    Settlement(#[from] SettlementError),
}

impl GatewayWebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayWebhookError::UnknownProcessor => StatusCode::NOT_FOUND,
            GatewayWebhookError::Verification(err) => err.status_code(),
            GatewayWebhookError::Settlement(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// True if the processor should redeliver.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_server_error()
    }
}

pub struct HandleGatewayWebhookHandler {
    gateways: GatewayRegistry,
    engine: Arc<SettlementEngine>,
}

impl HandleGatewayWebhookHandler {
    pub fn new(gateways: GatewayRegistry, engine: Arc<SettlementEngine>) -> Self {
        Self { gateways, engine }
    }

    /// Verifies and settles one callback.
    ///
    /// Every settlement outcome, including refusals and unknown orders, is
    /// acknowledged so the processor stops redelivering. Only verification
    /// failures and store errors surface as errors.
    pub async fn handle(
        &self,
        cmd: HandleGatewayWebhookCommand,
    ) -> Result<HandleGatewayWebhookResult, GatewayWebhookError> {
        let gateway = self
            .gateways
            .by_slug(&cmd.processor_slug)
            .ok_or(GatewayWebhookError::UnknownProcessor)?;

        let webhook = InboundWebhook {
            body: &cmd.body,
            headers: &cmd.headers,
            source_ip: cmd.source_ip,
        };
        let event = match gateway.verify_and_normalize(webhook).await {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    processor = gateway.processor().slug(),
                    source_ip = ?cmd.source_ip,
                    error = %err,
                    "Webhook verification failed"
                );
                return Err(err.into());
            }
        };

        let outcome = self.engine.settle(&event, Trigger::Webhook).await?;

        Ok(HandleGatewayWebhookResult {
            outcome,
            ack: gateway.acknowledgement(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryPaymentStore, MockGateway, RecordingListener};
    use crate::domain::foundation::{Currency, OrderId, Timestamp, UserId};
    use crate::domain::settlement::{
        IntentMetadata, PaymentIntent, PaymentState, Processor, SettlementEvent, TolerancePolicy,
    };
    use crate::ports::PaymentIntentStore;

    async fn setup(ack: WebhookAck) -> (Arc<MockGateway>, Arc<InMemoryPaymentStore>, HandleGatewayWebhookHandler) {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(MockGateway::new(Processor::Pal24).with_ack(ack));
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            TolerancePolicy::new(),
            Arc::new(RecordingListener::new()),
        ));
        let now = Timestamp::now();
        let intent = PaymentIntent::open(
            OrderId::new("p9_abcdef").unwrap(),
            Processor::Pal24,
            UserId::new(9),
            10_000,
            Currency::Rub,
            3600,
            IntentMetadata::balance_topup(UserId::new(9), "", "ru"),
            now,
        )
        .unwrap();
        store.insert(&intent).await.unwrap();
        let handler = HandleGatewayWebhookHandler::new(GatewayRegistry::new().with(gateway.clone()), engine);
        (gateway, store, handler)
    }

    fn command(slug: &str) -> HandleGatewayWebhookCommand {
        HandleGatewayWebhookCommand {
            processor_slug: slug.to_string(),
            body: b"InvId=p9_abcdef".to_vec(),
            headers: HeaderMap::new(),
            source_ip: None,
        }
    }

    fn paid(amount_minor: i64) -> SettlementEvent {
        SettlementEvent::verified(
            Processor::Pal24,
            OrderId::new("p9_abcdef").unwrap(),
            Some("TRS-1".into()),
            amount_minor,
            Currency::Rub,
            "SUCCESS",
            PaymentState::Paid,
        )
    }

    #[tokio::test]
    async fn verified_webhook_settles_and_returns_processor_ack() {
        let (gateway, store, handler) = setup(WebhookAck::Text("OK")).await;
        gateway.push_webhook(Ok(paid(10_000)));

        let result = handler.handle(command("pal24")).await.unwrap();

        assert!(matches!(result.outcome, SettlementOutcome::Finalized { .. }));
        assert_eq!(result.ack, WebhookAck::Text("OK"));
        assert_eq!(store.ledger_rows().len(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_not_retryable() {
        let (gateway, store, handler) = setup(WebhookAck::default()).await;
        gateway.push_webhook(Err(VerificationError::InvalidSignature));

        let err = handler.handle(command("pal24")).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!err.is_retryable());
        assert!(store.ledger_rows().is_empty());
    }

    #[tokio::test]
    async fn amount_mismatch_is_still_acknowledged() {
        let (gateway, store, handler) = setup(WebhookAck::default()).await;
        gateway.push_webhook(Ok(paid(9_000)));

        let result = handler.handle(command("pal24")).await.unwrap();

        assert_eq!(result.outcome.label(), "rejected");
        assert!(store.ledger_rows().is_empty());
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found() {
        let (_, _, handler) = setup(WebhookAck::default()).await;

        let err = handler.handle(command("paypal")).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}

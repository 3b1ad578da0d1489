//! CheckPaymentStatusHandler - on-demand status for the paying user.
//!
//! An unsettled, unexpired intent is polled at its processor first, so a
//! user asking "did it go through" never waits for the next sweep.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::foundation::{AuthenticatedUser, Currency, OrderId, Timestamp};
use crate::domain::settlement::{PaymentIntent, Processor, PublicStatus, Trigger};
use crate::ports::{GatewayRegistry, PaymentIntentStore, StatusLookup};

use super::{PaymentError, SettlementEngine};

#[derive(Debug, Clone)]
pub struct CheckPaymentStatusQuery {
    pub user: AuthenticatedUser,
    pub order_id: OrderId,
}

/// What the user may see about their payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatusView {
    pub order_id: OrderId,
    pub processor: Processor,
    pub status: PublicStatus,
    pub amount_minor: i64,
    pub currency: Currency,
    pub expires_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

impl PaymentStatusView {
    fn of(intent: &PaymentIntent, now: &Timestamp) -> Self {
        Self {
            order_id: intent.order_id.clone(),
            processor: intent.processor,
            status: intent.public_status(now),
            amount_minor: intent.amount_minor,
            currency: intent.currency,
            expires_at: intent.expires_at,
            settled_at: intent.settled_at,
        }
    }
}

pub struct CheckPaymentStatusHandler {
    store: Arc<dyn PaymentIntentStore>,
    gateways: GatewayRegistry,
    engine: Arc<SettlementEngine>,
    poll_timeout: Duration,
}

impl CheckPaymentStatusHandler {
    pub fn new(
        store: Arc<dyn PaymentIntentStore>,
        gateways: GatewayRegistry,
        engine: Arc<SettlementEngine>,
    ) -> Self {
        Self {
            store,
            gateways,
            engine,
            poll_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub async fn handle(&self, query: CheckPaymentStatusQuery) -> Result<PaymentStatusView, PaymentError> {
        let intent = self
            .store
            .find(&query.order_id)
            .await?
            .filter(|intent| intent.user_id == query.user.id)
            .ok_or(PaymentError::NotFound)?;

        let now = Timestamp::now();
        if intent.is_settled() || !intent.is_settleable_at(&now) {
            return Ok(PaymentStatusView::of(&intent, &now));
        }

        if !self.poll(&intent).await {
            return Ok(PaymentStatusView::of(&intent, &now));
        }

        let refreshed = self.store.find(&query.order_id).await?.unwrap_or(intent);
        Ok(PaymentStatusView::of(&refreshed, &Timestamp::now()))
    }

    /// Polls the processor and settles if it reports a result. Returns true
    /// if the engine was invoked.
    async fn poll(&self, intent: &PaymentIntent) -> bool {
        let Some(gateway) = self.gateways.get(intent.processor) else {
            return false;
        };
        let order_id = intent.order_id.as_str();
        let lookup = StatusLookup {
            order_id: intent.order_id.clone(),
            external_ref: intent.external_ref.clone(),
            currency: intent.currency,
        };

        let event = match tokio::time::timeout(self.poll_timeout, gateway.poll_status(&lookup)).await {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                debug!(order_id, processor = intent.processor.slug(), error = %err, "On-demand poll gave no result");
                return false;
            }
            Err(_) => {
                debug!(order_id, processor = intent.processor.slug(), "On-demand poll timed out");
                return false;
            }
        };

        match self.engine.settle(&event, Trigger::Poll).await {
            Ok(outcome) => {
                debug!(order_id, outcome = outcome.label(), "On-demand poll applied");
                true
            }
            Err(err) => {
                warn!(order_id, error = %err, "On-demand settlement failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryPaymentStore, MockGateway, RecordingListener};
    use crate::domain::foundation::UserId;
    use crate::domain::settlement::{IntentMetadata, PaymentState, SettlementEvent, TolerancePolicy};
    use crate::ports::PollError;

    struct Fixture {
        gateway: Arc<MockGateway>,
        handler: CheckPaymentStatusHandler,
        order_id: OrderId,
    }

    async fn fixture(ttl_secs: i64, created_at: Timestamp) -> Fixture {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(MockGateway::new(Processor::CryptoBot));
        let registry = GatewayRegistry::new().with(gateway.clone());
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            TolerancePolicy::new(),
            Arc::new(RecordingListener::new()),
        ));
        let order_id = OrderId::new("b3_abcdef").unwrap();
        let mut intent = PaymentIntent::open(
            order_id.clone(),
            Processor::CryptoBot,
            UserId::new(3),
            2_500,
            Currency::Usd,
            ttl_secs,
            IntentMetadata::balance_topup(UserId::new(3), "", "en"),
            created_at,
        )
        .unwrap();
        intent
            .mark_pending(Some("inv-1".into()), "https://t.me/pay".into(), created_at)
            .unwrap();
        store.insert(&intent).await.unwrap();
        Fixture {
            gateway,
            handler: CheckPaymentStatusHandler::new(store, registry, engine),
            order_id,
        }
    }

    fn query(user: i64, order_id: &OrderId) -> CheckPaymentStatusQuery {
        CheckPaymentStatusQuery {
            user: AuthenticatedUser::new(UserId::new(user), None),
            order_id: order_id.clone(),
        }
    }

    #[tokio::test]
    async fn poll_result_settles_before_answering() {
        let f = fixture(3600, Timestamp::now()).await;
        f.gateway.set_poll(
            f.order_id.clone(),
            Ok(SettlementEvent::verified(
                Processor::CryptoBot,
                f.order_id.clone(),
                Some("inv-1".into()),
                2_500,
                Currency::Usd,
                "paid",
                PaymentState::Paid,
            )),
        );

        let view = f.handler.handle(query(3, &f.order_id)).await.unwrap();

        assert_eq!(view.status, PublicStatus::Settled);
        assert!(view.settled_at.is_some());
    }

    #[tokio::test]
    async fn unknown_at_processor_stays_pending() {
        let f = fixture(3600, Timestamp::now()).await;
        f.gateway
            .set_poll(f.order_id.clone(), Err(PollError::Transient("503".into())));

        let view = f.handler.handle(query(3, &f.order_id)).await.unwrap();

        assert_eq!(view.status, PublicStatus::Pending);
        assert_eq!(f.gateway.poll_calls(), 1);
    }

    #[tokio::test]
    async fn expired_intent_is_not_polled() {
        let f = fixture(60, Timestamp::now().minus_secs(120)).await;

        let view = f.handler.handle(query(3, &f.order_id)).await.unwrap();

        assert_eq!(view.status, PublicStatus::Expired);
        assert_eq!(f.gateway.poll_calls(), 0);
    }

    #[tokio::test]
    async fn other_users_cannot_see_the_intent() {
        let f = fixture(3600, Timestamp::now()).await;

        let result = f.handler.handle(query(4, &f.order_id)).await;

        assert!(matches!(result, Err(PaymentError::NotFound)));
    }
}

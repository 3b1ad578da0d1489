//! Scripted gateway adapter for tests.
//!
//! Supports:
//! - Configurable checkout success, failure and latency
//! - A queued verification result per webhook
//! - Poll results keyed by order id
//! - Call tracking

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::foundation::OrderId;
use crate::domain::settlement::{Processor, SettlementEvent, DEFAULT_INTENT_TTL_SECS};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError, WebhookAck,
};

#[derive(Default)]
struct MockState {
    checkout_error: Option<String>,
    checkout_delay: Option<Duration>,
    checkout_ref: Option<String>,
    webhooks: VecDeque<Result<SettlementEvent, VerificationError>>,
    polls: HashMap<OrderId, Result<SettlementEvent, PollError>>,
    checkout_calls: usize,
    poll_calls: usize,
}

/// Gateway adapter whose answers are set up by the test.
pub struct MockGateway {
    processor: Processor,
    limits: AmountLimits,
    ttl_secs: i64,
    ack: WebhookAck,
    inner: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(processor: Processor) -> Self {
        Self {
            processor,
            limits: AmountLimits {
                min_minor: 100,
                max_minor: 10_000_000,
            },
            ttl_secs: DEFAULT_INTENT_TTL_SECS,
            ack: WebhookAck::default(),
            inner: Mutex::new(MockState::default()),
        }
    }

    pub fn with_limits(mut self, min_minor: i64, max_minor: i64) -> Self {
        self.limits = AmountLimits { min_minor, max_minor };
        self
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_ack(mut self, ack: WebhookAck) -> Self {
        self.ack = ack;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Makes `open_checkout` fail with a provider error.
    pub fn fail_checkout(&self, message: impl Into<String>) {
        self.state().checkout_error = Some(message.into());
    }

    /// Delays `open_checkout` to exercise caller deadlines.
    pub fn delay_checkout(&self, delay: Duration) {
        self.state().checkout_delay = Some(delay);
    }

    /// Processor reference returned with the checkout.
    pub fn set_checkout_ref(&self, external_ref: impl Into<String>) {
        self.state().checkout_ref = Some(external_ref.into());
    }

    /// Queues the result of the next `verify_and_normalize` call.
    pub fn push_webhook(&self, result: Result<SettlementEvent, VerificationError>) {
        self.state().webhooks.push_back(result);
    }

    /// Sets the answer `poll_status` gives for an order.
    pub fn set_poll(&self, order_id: OrderId, result: Result<SettlementEvent, PollError>) {
        self.state().polls.insert(order_id, result);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertions
    // ════════════════════════════════════════════════════════════════════════════

    pub fn checkout_calls(&self) -> usize {
        self.state().checkout_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.state().poll_calls
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn processor(&self) -> Processor {
        self.processor
    }

    fn amount_limits(&self) -> AmountLimits {
        self.limits
    }

    fn intent_ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    async fn open_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, GatewayError> {
        let (delay, error, external_ref) = {
            let mut state = self.state();
            state.checkout_calls += 1;
            (
                state.checkout_delay,
                state.checkout_error.clone(),
                state.checkout_ref.clone(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(GatewayError::Provider(message));
        }
        Ok(Checkout {
            checkout_url: format!("https://pay.test/{}/{}", self.processor.slug(), request.order_id),
            external_ref,
        })
    }

    async fn verify_and_normalize(
        &self,
        _webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        self.state()
            .webhooks
            .pop_front()
            .unwrap_or(Err(VerificationError::MissingSignature))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let mut state = self.state();
        state.poll_calls += 1;
        state
            .polls
            .get(&lookup.order_id)
            .cloned()
            .unwrap_or(Err(PollError::NotFound))
    }

    fn acknowledgement(&self) -> WebhookAck {
        self.ack.clone()
    }
}

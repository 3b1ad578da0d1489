//! Gateway adapter port - one implementation per payment processor.
//!
//! Adapters translate between a processor's wire protocol and the canonical
//! [`SettlementEvent`]. The engine, ledger and poller only ever see this
//! trait; nothing outside `adapters::gateways` names a concrete processor
//! protocol.
//!
//! # Contract
//!
//! - Adapters are stateless per order and safe to call concurrently
//! - `verify_and_normalize` fails closed: it returns a verified event or an error
//! - `create_intent` never calls the processor for an out-of-range amount

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::net::IpAddr;
use thiserror::Error;

use crate::domain::foundation::{Currency, OrderId, UserId};
use crate::domain::settlement::{Processor, SettlementEvent, DEFAULT_INTENT_TTL_SECS};

/// Inclusive amount bounds accepted by a processor, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountLimits {
    pub min_minor: i64,
    pub max_minor: i64,
}

impl AmountLimits {
    pub fn contains(&self, amount_minor: i64) -> bool {
        amount_minor >= self.min_minor && amount_minor <= self.max_minor
    }
}

/// Everything an adapter needs to open a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount_minor: i64,
    pub currency: Currency,
    pub description: String,
    pub language: String,
    pub email: Option<String>,
}

/// A successfully opened checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub checkout_url: String,
    /// Processor-side id when the processor assigns one up front.
    pub external_ref: Option<String>,
}

/// Raw inbound webhook, untouched by any parsing.
#[derive(Debug, Clone, Copy)]
pub struct InboundWebhook<'a> {
    pub body: &'a [u8],
    pub headers: &'a HeaderMap,
    pub source_ip: Option<IpAddr>,
}

/// Keys available to a status poll.
#[derive(Debug, Clone)]
pub struct StatusLookup {
    pub order_id: OrderId,
    pub external_ref: Option<String>,
    pub currency: Currency,
}

/// Processor-specific success body for acknowledged webhooks.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAck {
    Text(&'static str),
    Json(Value),
}

impl Default for WebhookAck {
    fn default() -> Self {
        WebhookAck::Json(serde_json::json!({ "status": "ok" }))
    }
}

/// Errors from checkout creation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Amount outside the processor's configured bounds. The processor was not called.
    #[error("Amount {actual} outside allowed range {min}..={max}")]
    AmountOutOfRange { min: i64, max: i64, actual: i64 },

    #[error("Currency {0} not supported by this processor")]
    UnsupportedCurrency(Currency),

    /// Outbound call exceeded its deadline.
    #[error("Processor request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    /// Processor answered with an error.
    #[error("Processor error: {0}")]
    Provider(String),

    /// Processor answered with something we could not parse.
    #[error("Malformed processor response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// True if retrying later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Network(_))
    }
}

/// Webhook verification failures. All of them are terminal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    /// Source address not in the processor's allow-list.
    #[error("Untrusted source address")]
    UntrustedSource,

    /// Payload names a different merchant account.
    #[error("Merchant mismatch")]
    MerchantMismatch,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Verification material (e.g. public key) could not be obtained.
    #[error("Verification unavailable: {0}")]
    Unavailable(String),
}

impl VerificationError {
    /// HTTP status for the webhook response. 4xx so processors do not retry,
    /// except when the verifier itself could not run.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::MissingSignature
            | VerificationError::InvalidSignature
            | VerificationError::MerchantMismatch => StatusCode::UNAUTHORIZED,
            VerificationError::UntrustedSource => StatusCode::FORBIDDEN,
            VerificationError::Malformed(_) => StatusCode::BAD_REQUEST,
            VerificationError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Errors from status polling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    /// Processor does not know the order (or the lookup key is missing).
    #[error("Payment not found at processor")]
    NotFound,

    /// Temporary failure; try again on the next sweep.
    #[error("Transient poll failure: {0}")]
    Transient(String),
}

impl From<GatewayError> for PollError {
    fn from(err: GatewayError) -> Self {
        PollError::Transient(err.to_string())
    }
}

/// Port implemented once per payment processor.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Which processor this adapter speaks for.
    fn processor(&self) -> Processor;

    /// Configured amount bounds.
    fn amount_limits(&self) -> AmountLimits;

    /// Currency used when the caller does not name one.
    fn currency(&self) -> Currency {
        Currency::Rub
    }

    /// Whether intents may be opened in `currency`.
    ///
    /// Webhook amounts are normalized in the processor's configured currency,
    /// so any other currency could never settle.
    fn supports_currency(&self, currency: Currency) -> bool {
        currency == self.currency()
    }

    /// Lifetime of intents opened through this processor.
    fn intent_ttl_secs(&self) -> i64 {
        DEFAULT_INTENT_TTL_SECS
    }

    /// Opens a checkout after checking amount bounds.
    ///
    /// # Errors
    ///
    /// `AmountOutOfRange` or `UnsupportedCurrency` without any outbound call
    /// when the request falls outside [`amount_limits`](Self::amount_limits)
    /// or [`supports_currency`](Self::supports_currency); otherwise whatever
    /// [`open_checkout`](Self::open_checkout) returns.
    async fn create_intent(&self, request: &CheckoutRequest) -> Result<Checkout, GatewayError> {
        let limits = self.amount_limits();
        if !limits.contains(request.amount_minor) {
            return Err(GatewayError::AmountOutOfRange {
                min: limits.min_minor,
                max: limits.max_minor,
                actual: request.amount_minor,
            });
        }
        if !self.supports_currency(request.currency) {
            return Err(GatewayError::UnsupportedCurrency(request.currency));
        }
        self.open_checkout(request).await
    }

    /// Processor call that opens the checkout. Called only by `create_intent`.
    async fn open_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, GatewayError>;

    /// Verifies a webhook and reduces it to a canonical event.
    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError>;

    /// Asks the processor for the current state of an order.
    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError>;

    /// Body returned on 200 acknowledgements.
    fn acknowledgement(&self) -> WebhookAck {
        WebhookAck::default()
    }
}

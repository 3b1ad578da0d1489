//! CreatePaymentIntentHandler - opens a checkout with a processor.
//!
//! The intent row is inserted as `created` before the processor is called,
//! then marked `pending` on success or `failed` on error or timeout. A
//! processor that never answers therefore leaves a failed row, not an orphan.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::foundation::{AuthenticatedUser, Currency, OrderId, Timestamp};
use crate::domain::settlement::{IntentMetadata, PaymentIntent, Processor};
use crate::ports::{CheckoutRequest, GatewayError, GatewayRegistry, PaymentIntentStore};

use super::PaymentError;

/// Default deadline for the processor's checkout call.
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(15);

/// Command to start a balance top-up.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntentCommand {
    pub user: AuthenticatedUser,
    pub processor: Processor,
    pub amount_minor: i64,
    /// Processor default when absent.
    pub currency: Option<Currency>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub email: Option<String>,
}

/// Result of a successfully opened checkout.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntentResult {
    pub order_id: OrderId,
    pub checkout_url: String,
    pub expires_at: Timestamp,
}

pub struct CreatePaymentIntentHandler {
    store: Arc<dyn PaymentIntentStore>,
    gateways: GatewayRegistry,
    checkout_timeout: Duration,
}

impl CreatePaymentIntentHandler {
    pub fn new(store: Arc<dyn PaymentIntentStore>, gateways: GatewayRegistry) -> Self {
        Self {
            store,
            gateways,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub async fn handle(
        &self,
        cmd: CreatePaymentIntentCommand,
    ) -> Result<CreatePaymentIntentResult, PaymentError> {
        let gateway = self
            .gateways
            .get(cmd.processor)
            .ok_or_else(|| PaymentError::ProcessorUnavailable(cmd.processor.slug().to_string()))?;

        let limits = gateway.amount_limits();
        if !limits.contains(cmd.amount_minor) {
            return Err(PaymentError::AmountOutOfRange {
                min: limits.min_minor,
                max: limits.max_minor,
                actual: cmd.amount_minor,
            });
        }

        let currency = cmd.currency.unwrap_or_else(|| gateway.currency());
        if !gateway.supports_currency(currency) {
            return Err(PaymentError::UnsupportedCurrency(currency));
        }
        let language = cmd.language.unwrap_or_else(|| "ru".to_string());
        let description = cmd.description.unwrap_or_else(|| {
            format!("Balance top-up via {}", cmd.processor.display_name())
        });
        let now = Timestamp::now();
        let order_id = OrderId::generate(cmd.processor.order_prefix(), cmd.user.order_ref());

        let intent = PaymentIntent::open(
            order_id.clone(),
            cmd.processor,
            cmd.user.id,
            cmd.amount_minor,
            currency,
            gateway.intent_ttl_secs(),
            IntentMetadata::balance_topup(cmd.user.id, description.clone(), language.clone()),
            now,
        )?;
        self.store.insert(&intent).await?;

        let request = CheckoutRequest {
            order_id: order_id.clone(),
            user_id: cmd.user.id,
            amount_minor: cmd.amount_minor,
            currency,
            description,
            language,
            email: cmd.email,
        };

        let checkout = match tokio::time::timeout(self.checkout_timeout, gateway.create_intent(&request)).await
        {
            Ok(Ok(checkout)) => checkout,
            Ok(Err(err)) => return Err(self.fail(&order_id, cmd.processor, err).await),
            Err(_) => return Err(self.fail(&order_id, cmd.processor, GatewayError::Timeout).await),
        };

        self.store
            .mark_pending(
                &order_id,
                checkout.external_ref.as_deref(),
                &checkout.checkout_url,
                Timestamp::now(),
            )
            .await?;

        info!(
            order_id = order_id.as_str(),
            processor = cmd.processor.slug(),
            user_id = %cmd.user.id,
            amount_minor = cmd.amount_minor,
            "Payment intent created"
        );

        Ok(CreatePaymentIntentResult {
            order_id,
            checkout_url: checkout.checkout_url,
            expires_at: intent.expires_at,
        })
    }

    async fn fail(&self, order_id: &OrderId, processor: Processor, err: GatewayError) -> PaymentError {
        warn!(
            order_id = order_id.as_str(),
            processor = processor.slug(),
            error = %err,
            "Checkout creation failed"
        );
        if let Err(store_err) = self.store.mark_failed(order_id, Timestamp::now()).await {
            warn!(order_id = order_id.as_str(), error = %store_err, "Could not mark intent failed");
        }
        match err {
            GatewayError::AmountOutOfRange { min, max, actual } => {
                PaymentError::AmountOutOfRange { min, max, actual }
            }
            GatewayError::UnsupportedCurrency(currency) => PaymentError::UnsupportedCurrency(currency),
            other => PaymentError::CheckoutFailed {
                retryable: other.is_retryable(),
            },
        }
    }
}

//! Settlement handlers - intent creation, webhooks, status checks, and the engine.

mod check_payment_status;
mod create_payment_intent;
mod errors;
mod handle_gateway_webhook;
mod settle_payment;

pub use check_payment_status::{CheckPaymentStatusHandler, CheckPaymentStatusQuery, PaymentStatusView};
pub use create_payment_intent::{
    CreatePaymentIntentCommand, CreatePaymentIntentHandler, CreatePaymentIntentResult,
    DEFAULT_CHECKOUT_TIMEOUT,
};
pub use errors::PaymentError;
pub use handle_gateway_webhook::{
    GatewayWebhookError, HandleGatewayWebhookCommand, HandleGatewayWebhookHandler,
    HandleGatewayWebhookResult,
};
pub use settle_payment::SettlementEngine;

//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Settlement Ports
//!
//! - `GatewayAdapter` - One per payment processor (checkout, webhook, poll)
//! - `GatewayRegistry` - Configured adapters by processor slug
//! - `PaymentIntentStore` - Intents and the atomic settlement guard
//! - `LedgerRepository` - Append-only ledger reads and derived rows
//! - `UserAccounts` - Balances, referral links, promo tiers
//! - `SettlementListener` - Hand-off to the side-effect pipeline
//!
//! ## Provisioning Ports
//!
//! - `SubscriptionRepository` - Subscription rows with the monotonic stamp
//! - `ProvisioningPanel` - Panel status queries
//!
//! ## Collaborator Ports
//!
//! - `Notifier`, `CartResumer`, `SessionValidator`

mod cart_resumer;
mod gateway_adapter;
mod gateway_registry;
mod ledger;
mod notifier;
mod payment_intent_store;
mod provisioning_panel;
mod session_validator;
mod settlement_listener;
mod subscription_repository;
mod user_accounts;

pub use cart_resumer::{CartOutcome, CartResumer};
pub use gateway_adapter::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError, WebhookAck,
};
pub use gateway_registry::GatewayRegistry;
pub use ledger::{LedgerRepository, SaveResult};
pub use notifier::{AdminNotice, Notifier, UserNotice};
pub use payment_intent_store::{CommitResult, PaymentIntentStore};
pub use provisioning_panel::{PanelError, PanelUserSnapshot, ProvisioningPanel};
pub use session_validator::SessionValidator;
pub use settlement_listener::{NoopSettlementListener, SettledPayment, SettlementListener};
pub use subscription_repository::SubscriptionRepository;
pub use user_accounts::{CreditResult, UserAccount, UserAccounts};

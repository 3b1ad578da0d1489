//! Provisioning panel (Remnawave) adapters.
//!
//! - `RemnawaveClient` - `ProvisioningPanel` over the panel's REST API
//! - `PanelWebhookVerifier` - body limits and HMAC check for panel webhooks

mod remnawave_client;
mod webhook_verifier;

pub use remnawave_client::RemnawaveClient;
pub use webhook_verifier::{PanelWebhookError, PanelWebhookVerifier, SIGNATURE_HEADER};

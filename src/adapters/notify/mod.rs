//! Notification and cart-resumption collaborators.
//!
//! - `HttpCallbackNotifier` - POSTs notices as JSON to configured URLs
//! - `HttpCartResumer` - asks the shop backend to complete a saved cart
//! - `LoggingNotifier`, `NoopCartResumer` - used when no callback is configured

mod http_callback;
mod logging;

pub use http_callback::{HttpCallbackNotifier, HttpCartResumer};
pub use logging::{LoggingNotifier, NoopCartResumer};

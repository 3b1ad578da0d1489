//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `gateways` - Payment processors (KassaAI/Freekassa, CloudPayments, Pal24, WATA, CryptoBot)
//! - `postgres` - Durable stores for intents, ledger, users and subscriptions
//! - `memory` - In-memory stores and doubles for tests and database-less runs
//! - `panel` - Remnawave panel client and webhook verification
//! - `notify` - User/admin notices and cart resumption over HTTP callbacks
//! - `auth` - Session token validation
//! - `http` - axum routes for users, processors and the panel

pub mod auth;
pub mod gateways;
pub mod http;
pub mod memory;
pub mod notify;
pub mod panel;
pub mod postgres;

//! Tollgate - payment settlement and subscription synchronization.
//!
//! Accepts top-ups through several payment processors, settles each payment
//! exactly once into an append-only ledger, and keeps local subscription
//! state in step with the provisioning panel.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

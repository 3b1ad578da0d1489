//! Application layer - Commands, Queries, Handlers and background jobs.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Request-driven work lives in `handlers`; scheduled work in `reconciliation`;
//! post-settlement work in `side_effects`.

pub mod handlers;
pub mod reconciliation;
pub mod side_effects;

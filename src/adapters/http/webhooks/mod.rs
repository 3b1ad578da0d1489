//! HTTP adapter for processor and panel callbacks.

pub mod handlers;
pub mod routes;

pub use routes::webhook_routes;

//! HTTP adapters - REST API and callback endpoints.
//!
//! Each area has its own module with handlers and routes; `router` stacks
//! them under the shared middleware.

pub mod middleware;
pub mod payments;
pub mod router;
pub mod webhooks;

mod state;

pub use router::build_router;
pub use state::AppState;

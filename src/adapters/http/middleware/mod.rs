//! HTTP middleware for axum.
//!
//! - `auth` - Authentication middleware and extractors
//! - `client_ip` - Source address of processor callbacks

pub mod auth;
pub mod client_ip;

pub use auth::{auth_middleware, AuthRejection, AuthState, RequireAuth};
pub use client_ip::client_ip;

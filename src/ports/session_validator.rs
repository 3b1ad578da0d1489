//! Session validation port for cabinet access tokens.
//!
//! The HTTP layer uses this to turn a Bearer token into an
//! [`AuthenticatedUser`] before any payment endpoint runs.
//!
//! # Contract
//!
//! Implementations must:
//! - Validate the token signature
//! - Validate issuer and expiry claims
//! - Return `AuthError::InvalidToken` for malformed/bad signature tokens
//! - Return `AuthError::TokenExpired` for expired tokens

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate a raw token (without the "Bearer " prefix).
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

//! Authentication types for the domain layer.
//!
//! Populated by the `SessionValidator` port from a verified cabinet token.
//! Only the claims the payment endpoints use are carried.

use super::UserId;
use thiserror::Error;

/// Caller identity extracted from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Local user id (`sub` claim).
    pub id: UserId,

    /// Telegram id if the account is linked to the bot.
    pub telegram_id: Option<i64>,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, telegram_id: Option<i64>) -> Self {
        Self { id, telegram_id }
    }

    /// Reference embedded in order ids: telegram id when known, else the local id.
    pub fn order_ref(&self) -> i64 {
        self.telegram_id.unwrap_or_else(|| self.id.as_i64())
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token is missing, malformed, or has an invalid signature.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Validation could not be performed.
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ref_prefers_telegram_id() {
        assert_eq!(AuthenticatedUser::new(UserId::new(5), Some(900)).order_ref(), 900);
        assert_eq!(AuthenticatedUser::new(UserId::new(5), None).order_ref(), 5);
    }

    #[test]
    fn auth_error_displays_message() {
        let err = AuthError::service_unavailable("key not loaded");
        assert_eq!(format!("{}", err), "Auth service unavailable: key not loaded");
        assert!(err.is_transient());
        assert!(!AuthError::InvalidToken.is_transient());
    }
}

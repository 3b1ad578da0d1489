//! CartResumer port - completes a purchase suspended for insufficient funds.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::foundation::{DomainError, UserId};

/// What happened to the user's saved cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartOutcome {
    NoCart,
    Completed,
    InsufficientFunds,
}

#[async_trait]
pub trait CartResumer: Send + Sync {
    /// Attempts to complete the user's pending cart with the current balance.
    async fn resume(&self, user_id: UserId) -> Result<CartOutcome, DomainError>;
}

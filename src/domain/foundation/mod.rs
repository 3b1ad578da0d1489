//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, money and error types
//! that form the vocabulary of the Tollgate domain.

mod auth;
mod errors;
mod ids;
mod money;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{OrderId, PanelUserId, SubscriptionId, TransactionId, UserId};
pub use money::Currency;
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;

//! Settlement decisions and engine errors.

use serde::Serialize;
use thiserror::Error;

use crate::domain::foundation::{DomainError, TransactionId};

/// Why a verified-or-not event was refused. Never shown to end users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    Unverified,
    AmountMismatch { expected: i64, actual: i64 },
    Expired,
    ProcessorMismatch,
    /// The processor reference is already recorded against another order.
    DuplicateReference,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Unverified => "unverified",
            RejectReason::AmountMismatch { .. } => "amount_mismatch",
            RejectReason::Expired => "expired",
            RejectReason::ProcessorMismatch => "processor_mismatch",
            RejectReason::DuplicateReference => "duplicate_reference",
        }
    }
}

/// Result of applying one event to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// This call created the ledger transaction.
    Finalized { transaction_id: TransactionId },
    /// Another caller already settled the intent. Not an error.
    AlreadySettled,
    /// Terminal refusal; never retried automatically.
    Rejected(RejectReason),
    /// No intent for the order id.
    NotFound,
    /// A non-paid event was recorded without settling.
    Acknowledged,
}

impl SettlementOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Finalized { .. } => "finalized",
            SettlementOutcome::AlreadySettled => "already_settled",
            SettlementOutcome::Rejected(_) => "rejected",
            SettlementOutcome::NotFound => "not_found",
            SettlementOutcome::Acknowledged => "acknowledged",
        }
    }
}

/// Failure of the settlement engine itself, as opposed to a refusal.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Store round-trip failed; the caller should retry.
    #[error("Settlement store error: {0}")]
    Store(#[from] DomainError),
}

impl SettlementError {
    /// Store failures are always worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Store(_))
    }
}

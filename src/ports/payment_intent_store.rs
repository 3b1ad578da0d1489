//! PaymentIntentStore port - persisted intents and the settlement guard.
//!
//! The store is the single arbiter of "already settled". Every mutation
//! here is a conditional write: callers learn from the result whether their
//! write won, never from a prior read.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, OrderId, Timestamp};
use crate::domain::settlement::{LedgerTransaction, PaymentIntent};

/// Result of the atomic settle-and-record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// This call set `ledger_transaction_id` and inserted the ledger row.
    Committed,
    /// Another writer settled the intent first. Nothing was written.
    AlreadySettled,
    /// The intent lapsed before the write. Nothing was written.
    Expired,
    /// No intent row for the order id.
    Missing,
}

/// Port for payment intent persistence.
#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
    /// Inserts a freshly opened intent.
    ///
    /// # Errors
    ///
    /// `Conflict` if the order id already exists.
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), DomainError>;

    /// Looks up an intent by order id.
    async fn find(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, DomainError>;

    /// `created → pending` with the processor's checkout details.
    ///
    /// Returns false if the intent is no longer `created`.
    async fn mark_pending(
        &self,
        order_id: &OrderId,
        external_ref: Option<&str>,
        checkout_url: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError>;

    /// Marks an unsettled `created` or `pending` intent failed.
    ///
    /// Never touches a settled or expired intent. Returns true if the row changed.
    async fn mark_failed(&self, order_id: &OrderId, now: Timestamp) -> Result<bool, DomainError>;

    /// Atomically stamps the intent settled and appends the ledger row.
    ///
    /// In one store transaction: set `ledger_transaction_id`, `status = settled`
    /// and `settled_at` where the order exists, `ledger_transaction_id` is null
    /// and `expires_at >= now`; insert `transaction` only if that update
    /// affected a row. Two concurrent callers for the same order produce
    /// exactly one `Committed`. An `external_ref` recorded at checkout is
    /// kept; `external_ref` only fills an empty one.
    async fn commit_settlement(
        &self,
        order_id: &OrderId,
        transaction: &LedgerTransaction,
        external_ref: Option<&str>,
        now: Timestamp,
    ) -> Result<CommitResult, DomainError>;

    /// Unsettled `pending`/`failed` intents created before `created_before`
    /// and not yet expired at `now`, oldest first.
    async fn list_reconcilable(
        &self,
        created_before: Timestamp,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, DomainError>;

    /// Marks unsettled intents past expiry as `expired`. Returns the order ids changed.
    async fn expire_overdue(&self, now: Timestamp, limit: i64) -> Result<Vec<OrderId>, DomainError>;
}

//! Ledger port - append-only transaction log.
//!
//! Deposits are written by [`PaymentIntentStore::commit_settlement`]
//! together with the intent stamp; this port covers everything else
//! (derived rows such as referral rewards, and reads).
//!
//! [`PaymentIntentStore::commit_settlement`]: super::PaymentIntentStore::commit_settlement

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp, TransactionId, UserId};
use crate::domain::settlement::LedgerTransaction;

/// Outcome of an idempotent append keyed by `external_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Row was written.
    Inserted,
    /// A row with the same external reference already exists. Nothing written.
    AlreadyExists,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Appends a row unless one with the same `external_ref` exists.
    async fn append(&self, transaction: &LedgerTransaction) -> Result<SaveResult, DomainError>;

    async fn find(&self, id: TransactionId) -> Result<Option<LedgerTransaction>, DomainError>;

    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<LedgerTransaction>, DomainError>;

    /// Sum of the user's completed deposits, in minor units.
    async fn lifetime_deposits(&self, user_id: UserId) -> Result<i64, DomainError>;

    /// Completed deposits whose balance credit has not been applied, completed
    /// at or before `completed_before`, oldest first.
    async fn list_uncredited_deposits(
        &self,
        completed_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError>;
}

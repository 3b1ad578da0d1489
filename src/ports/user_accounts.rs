//! UserAccounts port - balances, referral links and promo tiers.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, TransactionId, UserId};

/// The slice of a user account the settlement core reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub telegram_id: Option<i64>,
    pub email: Option<String>,
    pub language: String,
    pub balance_minor: i64,
    pub has_made_first_topup: bool,
    pub referred_by: Option<UserId>,
    pub promo_tier: Option<String>,
}

/// Result of crediting a ledger transaction to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditResult {
    Applied {
        new_balance_minor: i64,
        /// This credit was the user's first top-up.
        first_topup: bool,
    },
    /// The transaction was credited before. Balance unchanged.
    AlreadyApplied,
}

#[async_trait]
pub trait UserAccounts: Send + Sync {
    async fn find(&self, id: UserId) -> Result<Option<UserAccount>, DomainError>;

    async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserAccount>, DomainError>;

    /// Adds `amount_minor` to the balance once per ledger transaction.
    ///
    /// The transaction's credit marker and the balance change commit together.
    async fn apply_credit(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
        amount_minor: i64,
    ) -> Result<CreditResult, DomainError>;

    /// Compare-and-set of the promo tier. Returns false if `expected` no longer matches.
    async fn set_promo_tier(
        &self,
        user_id: UserId,
        expected: Option<&str>,
        tier: &str,
    ) -> Result<bool, DomainError>;
}

//! In-memory payment store for tests and local runs.
//!
//! Intents, ledger rows and balances share one mutex, so the settle-and-record
//! commit has the same all-or-nothing semantics as the Postgres transaction.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, Timestamp, TransactionId, UserId};
use crate::domain::settlement::{IntentStatus, LedgerKind, LedgerTransaction, PaymentIntent};
use crate::ports::{
    CommitResult, CreditResult, LedgerRepository, PaymentIntentStore, SaveResult, UserAccount,
    UserAccounts,
};

#[derive(Default)]
struct State {
    intents: HashMap<OrderId, PaymentIntent>,
    ledger: Vec<LedgerTransaction>,
    credited: HashSet<TransactionId>,
    users: HashMap<UserId, UserAccount>,
}

impl State {
    fn external_ref_taken(&self, external_ref: &Option<String>) -> bool {
        external_ref.is_some() && self.ledger.iter().any(|t| &t.external_ref == external_ref)
    }
}

/// Payment intents, ledger and user balances behind a single lock.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<State>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Test Helpers ===

    /// Registers a user account.
    pub fn add_user(&self, account: UserAccount) {
        self.lock().users.insert(account.id, account);
    }

    /// Current copy of a user account.
    pub fn user(&self, id: UserId) -> Option<UserAccount> {
        self.lock().users.get(&id).cloned()
    }

    /// Current copy of an intent.
    pub fn intent(&self, order_id: &OrderId) -> Option<PaymentIntent> {
        self.lock().intents.get(order_id).cloned()
    }

    /// Number of stored intents, in any status.
    pub fn intent_count(&self) -> usize {
        self.lock().intents.len()
    }

    /// Every ledger row, in insertion order.
    pub fn ledger_rows(&self) -> Vec<LedgerTransaction> {
        self.lock().ledger.clone()
    }

    /// Ledger rows for one order.
    pub fn ledger_rows_for(&self, order_id: &OrderId) -> Vec<LedgerTransaction> {
        self.lock()
            .ledger
            .iter()
            .filter(|t| t.order_id.as_ref() == Some(order_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PaymentIntentStore for InMemoryPaymentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), DomainError> {
        let mut state = self.lock();
        if state.intents.contains_key(&intent.order_id) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Intent {} already exists", intent.order_id),
            ));
        }
        state.intents.insert(intent.order_id.clone(), intent.clone());
        Ok(())
    }

    async fn find(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, DomainError> {
        Ok(self.lock().intents.get(order_id).cloned())
    }

    async fn mark_pending(
        &self,
        order_id: &OrderId,
        external_ref: Option<&str>,
        checkout_url: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let mut state = self.lock();
        let Some(intent) = state.intents.get_mut(order_id) else {
            return Ok(false);
        };
        if intent.status != IntentStatus::Created {
            return Ok(false);
        }
        intent.mark_pending(external_ref.map(String::from), checkout_url.to_string(), now)?;
        Ok(true)
    }

    async fn mark_failed(&self, order_id: &OrderId, now: Timestamp) -> Result<bool, DomainError> {
        let mut state = self.lock();
        Ok(state
            .intents
            .get_mut(order_id)
            .filter(|intent| !intent.is_settled())
            .map(|intent| intent.mark_failed(now))
            .unwrap_or(false))
    }

    async fn commit_settlement(
        &self,
        order_id: &OrderId,
        transaction: &LedgerTransaction,
        external_ref: Option<&str>,
        now: Timestamp,
    ) -> Result<CommitResult, DomainError> {
        let mut state = self.lock();
        let Some(intent) = state.intents.get(order_id) else {
            return Ok(CommitResult::Missing);
        };
        if intent.is_settled() {
            return Ok(CommitResult::AlreadySettled);
        }
        if intent.is_expired_at(&now) || intent.status == IntentStatus::Expired {
            return Ok(CommitResult::Expired);
        }
        if state.external_ref_taken(&transaction.external_ref) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                "Ledger external reference already recorded",
            ));
        }
        if let Some(intent) = state.intents.get_mut(order_id) {
            intent.settle(transaction.id, external_ref.map(String::from), now)?;
        }
        state.ledger.push(transaction.clone());
        Ok(CommitResult::Committed)
    }

    async fn list_reconcilable(
        &self,
        created_before: Timestamp,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, DomainError> {
        let state = self.lock();
        let mut intents: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|i| matches!(i.status, IntentStatus::Pending | IntentStatus::Failed))
            .filter(|i| !i.is_settled() && i.created_at.is_before(&created_before))
            .filter(|i| !i.is_expired_at(&now))
            .cloned()
            .collect();
        intents.sort_by_key(|i| i.created_at);
        intents.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(intents)
    }

    async fn expire_overdue(&self, now: Timestamp, limit: i64) -> Result<Vec<OrderId>, DomainError> {
        let mut state = self.lock();
        let mut expired = Vec::new();
        let max = usize::try_from(limit.max(0)).unwrap_or(0);
        for intent in state.intents.values_mut() {
            if expired.len() >= max {
                break;
            }
            if intent.is_expired_at(&now) && intent.mark_expired(now) {
                expired.push(intent.order_id.clone());
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryPaymentStore {
    async fn append(&self, transaction: &LedgerTransaction) -> Result<SaveResult, DomainError> {
        let mut state = self.lock();
        if state.external_ref_taken(&transaction.external_ref)
            || state.ledger.iter().any(|t| t.id == transaction.id)
        {
            return Ok(SaveResult::AlreadyExists);
        }
        state.ledger.push(transaction.clone());
        Ok(SaveResult::Inserted)
    }

    async fn find(&self, id: TransactionId) -> Result<Option<LedgerTransaction>, DomainError> {
        Ok(self.lock().ledger.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<LedgerTransaction>, DomainError> {
        Ok(self
            .lock()
            .ledger
            .iter()
            .find(|t| t.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn lifetime_deposits(&self, user_id: UserId) -> Result<i64, DomainError> {
        Ok(self
            .lock()
            .ledger
            .iter()
            .filter(|t| t.user_id == user_id && t.kind == LedgerKind::Deposit && t.is_completed)
            .map(|t| t.amount_minor)
            .sum())
    }

    async fn list_uncredited_deposits(
        &self,
        completed_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError> {
        let state = self.lock();
        let mut rows: Vec<LedgerTransaction> = state
            .ledger
            .iter()
            .filter(|t| t.kind == LedgerKind::Deposit && t.is_completed)
            .filter(|t| !state.credited.contains(&t.id))
            .filter(|t| t.completed_at.is_some_and(|at| !at.is_after(&completed_before)))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.completed_at);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl UserAccounts for InMemoryPaymentStore {
    async fn find(&self, id: UserId) -> Result<Option<UserAccount>, DomainError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserAccount>, DomainError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.telegram_id == Some(telegram_id))
            .cloned())
    }

    async fn apply_credit(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
        amount_minor: i64,
    ) -> Result<CreditResult, DomainError> {
        let mut state = self.lock();
        if state.credited.contains(&transaction_id) {
            return Ok(CreditResult::AlreadyApplied);
        }
        let is_deposit = state
            .ledger
            .iter()
            .any(|t| t.id == transaction_id && t.kind == LedgerKind::Deposit);
        let account = state.users.get_mut(&user_id).ok_or_else(|| {
            DomainError::new(ErrorCode::UserNotFound, format!("User {} not found", user_id))
        })?;
        account.balance_minor += amount_minor;
        let first_topup = is_deposit && !account.has_made_first_topup;
        if first_topup {
            account.has_made_first_topup = true;
        }
        let new_balance_minor = account.balance_minor;
        state.credited.insert(transaction_id);
        Ok(CreditResult::Applied {
            new_balance_minor,
            first_topup,
        })
    }

    async fn set_promo_tier(
        &self,
        user_id: UserId,
        expected: Option<&str>,
        tier: &str,
    ) -> Result<bool, DomainError> {
        let mut state = self.lock();
        let Some(account) = state.users.get_mut(&user_id) else {
            return Ok(false);
        };
        if account.promo_tier.as_deref() != expected {
            return Ok(false);
        }
        account.promo_tier = Some(tier.to_string());
        Ok(true)
    }
}

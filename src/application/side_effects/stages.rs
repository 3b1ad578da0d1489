//! Post-settlement stages, in pipeline order.
//!
//! Every stage is idempotent for a given ledger transaction so the pipeline
//! can retry it freely.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::settlement::{referral_ref, LedgerTransaction, PromoLadder};
use crate::ports::{
    AdminNotice, CartOutcome, CartResumer, CreditResult, LedgerRepository, Notifier, SaveResult,
    SettledPayment, UserAccounts, UserNotice,
};

use super::pipeline::{SideEffectError, SideEffectStage};

// ════════════════════════════════════════════════════════════════════════════
// Balance credit
// ════════════════════════════════════════════════════════════════════════════

pub struct BalanceCreditStage {
    accounts: Arc<dyn UserAccounts>,
}

impl BalanceCreditStage {
    pub fn new(accounts: Arc<dyn UserAccounts>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl SideEffectStage for BalanceCreditStage {
    fn name(&self) -> &'static str {
        "balance_credit"
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        let tx = &payment.transaction;
        match self
            .accounts
            .apply_credit(tx.user_id, tx.id, tx.amount_minor)
            .await?
        {
            CreditResult::Applied {
                new_balance_minor,
                first_topup,
            } => info!(
                user_id = %tx.user_id,
                transaction_id = %tx.id,
                amount_minor = tx.amount_minor,
                new_balance_minor,
                first_topup,
                "Balance credited"
            ),
            CreditResult::AlreadyApplied => {
                debug!(transaction_id = %tx.id, "Balance credit already applied")
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Referral commission
// ════════════════════════════════════════════════════════════════════════════

pub struct ReferralRewardStage {
    accounts: Arc<dyn UserAccounts>,
    ledger: Arc<dyn LedgerRepository>,
    percent: u32,
}

impl ReferralRewardStage {
    pub fn new(accounts: Arc<dyn UserAccounts>, ledger: Arc<dyn LedgerRepository>, percent: u32) -> Self {
        Self {
            accounts,
            ledger,
            percent,
        }
    }

    /// `floor(amount * percent / 100)`.
    pub fn commission(&self, amount_minor: i64) -> i64 {
        amount_minor.max(0).saturating_mul(i64::from(self.percent)) / 100
    }
}

#[async_trait]
impl SideEffectStage for ReferralRewardStage {
    fn name(&self) -> &'static str {
        "referral_reward"
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        let tx = &payment.transaction;
        let Some(payer) = self.accounts.find(tx.user_id).await? else {
            return Ok(());
        };
        let Some(referrer) = payer.referred_by else {
            return Ok(());
        };
        let reward_minor = self.commission(tx.amount_minor);
        if reward_minor <= 0 {
            return Ok(());
        }

        let reward = LedgerTransaction::referral_reward(
            referrer,
            tx.id,
            reward_minor,
            tx.currency,
            Timestamp::now(),
        );
        let reward_id = match self.ledger.append(&reward).await? {
            SaveResult::Inserted => reward.id,
            // A previous attempt wrote the row; finish crediting it.
            SaveResult::AlreadyExists => self
                .ledger
                .find_by_external_ref(&referral_ref(tx.id))
                .await?
                .map(|existing| existing.id)
                .ok_or_else(|| {
                    SideEffectError::Collaborator("referral row reported but not found".into())
                })?,
        };

        if let CreditResult::Applied { .. } = self
            .accounts
            .apply_credit(referrer, reward_id, reward_minor)
            .await?
        {
            info!(
                referrer = %referrer,
                payer = %tx.user_id,
                reward_minor,
                "Referral commission credited"
            );
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Promo tier
// ════════════════════════════════════════════════════════════════════════════

pub struct PromoTierStage {
    accounts: Arc<dyn UserAccounts>,
    ledger: Arc<dyn LedgerRepository>,
    ladder: PromoLadder,
}

impl PromoTierStage {
    pub fn new(accounts: Arc<dyn UserAccounts>, ledger: Arc<dyn LedgerRepository>, ladder: PromoLadder) -> Self {
        Self {
            accounts,
            ledger,
            ladder,
        }
    }

    async fn evaluate(&self, user_id: UserId) -> Result<(), SideEffectError> {
        let Some(account) = self.accounts.find(user_id).await? else {
            return Ok(());
        };
        let lifetime = self.ledger.lifetime_deposits(user_id).await?;
        let current = account.promo_tier.as_deref();
        let Some(tier) = self.ladder.upgrade(current, lifetime) else {
            return Ok(());
        };

        if self
            .accounts
            .set_promo_tier(user_id, current, &tier.name)
            .await?
        {
            info!(user_id = %user_id, tier = %tier.name, lifetime_minor = lifetime, "Promo tier upgraded");
        } else {
            debug!(user_id = %user_id, "Promo tier changed concurrently, skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl SideEffectStage for PromoTierStage {
    fn name(&self) -> &'static str {
        "promo_tier"
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        if self.ladder.is_empty() {
            return Ok(());
        }
        self.evaluate(payment.transaction.user_id).await
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Notifications
// ════════════════════════════════════════════════════════════════════════════

pub struct UserNotifyStage {
    accounts: Arc<dyn UserAccounts>,
    notifier: Arc<dyn Notifier>,
}

impl UserNotifyStage {
    pub fn new(accounts: Arc<dyn UserAccounts>, notifier: Arc<dyn Notifier>) -> Self {
        Self { accounts, notifier }
    }
}

#[async_trait]
impl SideEffectStage for UserNotifyStage {
    fn name(&self) -> &'static str {
        "user_notify"
    }

    fn replayable(&self) -> bool {
        false
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        let tx = &payment.transaction;
        let intent = &payment.intent;
        let mut notice = UserNotice::new(tx.user_id, "payment_settled")
            .with_param("amount", tx.currency.format_major(tx.amount_minor))
            .with_param("currency", tx.currency.code())
            .with_param("processor", intent.processor.display_name())
            .with_param("order_id", intent.order_id.as_str());
        if let Some(account) = self.accounts.find(tx.user_id).await? {
            notice = notice
                .with_param("balance", tx.currency.format_major(account.balance_minor))
                .with_param("language", account.language);
        }
        self.notifier.notify_user(&notice).await?;
        Ok(())
    }
}

pub struct AdminNotifyStage {
    notifier: Arc<dyn Notifier>,
}

impl AdminNotifyStage {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl SideEffectStage for AdminNotifyStage {
    fn name(&self) -> &'static str {
        "admin_notify"
    }

    fn replayable(&self) -> bool {
        false
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        let tx = &payment.transaction;
        let notice = AdminNotice::new("payment_settled", "Balance top-up")
            .with_field("user_id", tx.user_id.to_string())
            .with_field("amount", format!("{} {}", tx.currency.format_major(tx.amount_minor), tx.currency))
            .with_field("processor", payment.intent.processor.display_name())
            .with_field("order_id", payment.intent.order_id.as_str())
            .with_field("trigger", payment.trigger.to_string());
        self.notifier.notify_admin(&notice).await?;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Cart resumption
// ════════════════════════════════════════════════════════════════════════════

pub struct CartResumeStage {
    resumer: Arc<dyn CartResumer>,
}

impl CartResumeStage {
    pub fn new(resumer: Arc<dyn CartResumer>) -> Self {
        Self { resumer }
    }
}

#[async_trait]
impl SideEffectStage for CartResumeStage {
    fn name(&self) -> &'static str {
        "cart_resume"
    }

    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError> {
        let user_id = payment.transaction.user_id;
        match self.resumer.resume(user_id).await? {
            CartOutcome::NoCart => debug!(user_id = %user_id, "No saved cart"),
            CartOutcome::Completed => info!(user_id = %user_id, "Saved cart completed"),
            CartOutcome::InsufficientFunds => {
                info!(user_id = %user_id, "Saved cart still lacks funds")
            }
        }
        Ok(())
    }
}

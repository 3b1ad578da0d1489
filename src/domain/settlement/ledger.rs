//! Immutable ledger transactions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Currency, OrderId, Timestamp, TransactionId, UserId, ValidationError};

use super::{PaymentIntent, Processor, SettlementEvent};

/// Kind of financial fact recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Deposit,
    SubscriptionPayment,
    Refund,
    ReferralReward,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Deposit => "deposit",
            LedgerKind::SubscriptionPayment => "subscription_payment",
            LedgerKind::Refund => "refund",
            LedgerKind::ReferralReward => "referral_reward",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(LedgerKind::Deposit),
            "subscription_payment" => Ok(LedgerKind::SubscriptionPayment),
            "refund" => Ok(LedgerKind::Refund),
            "referral_reward" => Ok(LedgerKind::ReferralReward),
            other => Err(ValidationError::invalid_format(
                "ledger_kind",
                format!("unknown kind '{}'", other),
            )),
        }
    }
}

/// One immutable ledger row. Positive amounts credit the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount_minor: i64,
    pub currency: Currency,
    pub kind: LedgerKind,
    pub processor: Option<Processor>,
    /// Unique across the ledger when present.
    pub external_ref: Option<String>,
    pub order_id: Option<OrderId>,
    pub description: String,
    pub is_completed: bool,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl LedgerTransaction {
    /// Completed deposit crediting the intent's recorded amount.
    ///
    /// The intent amount is authoritative; the event only contributes its
    /// external reference (falling back to the order id).
    pub fn deposit(intent: &PaymentIntent, event: &SettlementEvent, now: Timestamp) -> Self {
        let external_ref = event
            .external_ref
            .clone()
            .unwrap_or_else(|| intent.order_id.as_str().to_string());
        let description = if intent.metadata.description.is_empty() {
            format!("Balance top-up via {}", intent.processor.display_name())
        } else {
            intent.metadata.description.clone()
        };
        Self {
            id: TransactionId::new(),
            user_id: intent.user_id,
            amount_minor: intent.amount_minor,
            currency: intent.currency,
            kind: LedgerKind::Deposit,
            processor: Some(intent.processor),
            external_ref: Some(format!("{}:{}", intent.processor.slug(), external_ref)),
            order_id: Some(intent.order_id.clone()),
            description,
            is_completed: true,
            completed_at: Some(now),
            created_at: now,
        }
    }

    /// Referral commission row keyed by the deposit it derives from.
    pub fn referral_reward(
        referrer: UserId,
        source: TransactionId,
        amount_minor: i64,
        currency: Currency,
        now: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id: referrer,
            amount_minor,
            currency,
            kind: LedgerKind::ReferralReward,
            processor: None,
            external_ref: Some(referral_ref(source)),
            order_id: None,
            description: "Referral commission".to_string(),
            is_completed: true,
            completed_at: Some(now),
            created_at: now,
        }
    }
}

/// Unique external reference of the referral reward for a deposit.
pub fn referral_ref(source: TransactionId) -> String {
    format!("referral:{}", source)
}

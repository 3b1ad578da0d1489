//! PaymentIntent - one attempt by a user to pay through a processor.
//!
//! # Invariants
//!
//! - `order_id` is unique and never changes
//! - `ledger_transaction_id` is set at most once and never cleared
//! - `status == Settled` if and only if `ledger_transaction_id` is set
//! - Status transitions follow [`IntentStatus`] rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{
    Currency, DomainError, ErrorCode, OrderId, StateMachine, Timestamp, TransactionId, UserId,
    ValidationError,
};

use super::Processor;

/// Default lifetime of an intent before late confirmations are refused.
pub const DEFAULT_INTENT_TTL_SECS: i64 = 3600;

/// Lifecycle status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Row inserted, processor call not yet answered. A confirmation that
    /// races the checkout response may settle it directly.
    Created,
    /// Processor accepted the checkout; waiting for confirmation.
    Pending,
    /// Ledger transaction recorded. Terminal.
    Settled,
    /// Processor call failed or the processor reported a failed attempt.
    /// Still settleable until expiry.
    Failed,
    /// Lapsed without settlement. Terminal.
    Expired,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Pending => "pending",
            IntentStatus::Settled => "settled",
            IntentStatus::Failed => "failed",
            IntentStatus::Expired => "expired",
        }
    }
}

impl StateMachine for IntentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use IntentStatus::*;
        matches!(
            (self, target),
            (Created, Pending)
                | (Created, Failed)
                | (Created, Settled)
                | (Created, Expired)
                | (Pending, Settled)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Failed, Settled)
                | (Failed, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use IntentStatus::*;
        match self {
            Created => vec![Pending, Failed, Settled, Expired],
            Pending => vec![Settled, Failed, Expired],
            Failed => vec![Settled, Expired],
            Settled | Expired => vec![],
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(IntentStatus::Created),
            "pending" => Ok(IntentStatus::Pending),
            "settled" => Ok(IntentStatus::Settled),
            "failed" => Ok(IntentStatus::Failed),
            "expired" => Ok(IntentStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "intent_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// Status as shown to the paying user. Internal failure reasons never surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Pending,
    Settled,
    Expired,
}

/// Opaque metadata stored with the intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub user_id: i64,
    pub purpose: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "ru".to_string()
}

impl IntentMetadata {
    /// Metadata for a plain balance top-up.
    pub fn balance_topup(user_id: UserId, description: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            user_id: user_id.as_i64(),
            purpose: "balance_topup".to_string(),
            description: description.into(),
            language: language.into(),
        }
    }
}

/// A persisted, not-yet-settled (or settled) attempt to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub order_id: OrderId,
    pub processor: Processor,
    pub user_id: UserId,
    pub amount_minor: i64,
    pub currency: Currency,
    pub status: IntentStatus,
    pub external_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub ledger_transaction_id: Option<TransactionId>,
    pub expires_at: Timestamp,
    pub metadata: IntentMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

impl PaymentIntent {
    /// Creates a fresh intent in `Created` status.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for a non-positive amount or TTL.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        order_id: OrderId,
        processor: Processor,
        user_id: UserId,
        amount_minor: i64,
        currency: Currency,
        ttl_secs: i64,
        metadata: IntentMetadata,
        now: Timestamp,
    ) -> Result<Self, ValidationError> {
        if amount_minor <= 0 {
            return Err(ValidationError::out_of_range("amount_minor", 1, i64::MAX, amount_minor));
        }
        if ttl_secs <= 0 {
            return Err(ValidationError::out_of_range("ttl_secs", 1, i64::MAX, ttl_secs));
        }
        Ok(Self {
            order_id,
            processor,
            user_id,
            amount_minor,
            currency,
            status: IntentStatus::Created,
            external_ref: None,
            checkout_url: None,
            ledger_transaction_id: None,
            expires_at: now.plus_secs(ttl_secs),
            metadata,
            created_at: now,
            updated_at: now,
            settled_at: None,
        })
    }

    /// True once a ledger transaction has been recorded.
    pub fn is_settled(&self) -> bool {
        self.ledger_transaction_id.is_some()
    }

    /// True when `now` is strictly past the expiry timestamp.
    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        now.is_after(&self.expires_at)
    }

    /// True if a verified confirmation arriving at `now` could still settle it.
    pub fn is_settleable_at(&self, now: &Timestamp) -> bool {
        !self.is_settled() && !self.is_expired_at(now) && self.status != IntentStatus::Expired
    }

    /// Status as reported to the paying user.
    pub fn public_status(&self, now: &Timestamp) -> PublicStatus {
        if self.is_settled() {
            PublicStatus::Settled
        } else if self.status == IntentStatus::Expired || self.is_expired_at(now) {
            PublicStatus::Expired
        } else {
            PublicStatus::Pending
        }
    }

    /// Records the processor's acceptance of the checkout.
    ///
    /// # Errors
    ///
    /// Returns error if the intent is not in `Created` status.
    pub fn mark_pending(
        &mut self,
        external_ref: Option<String>,
        checkout_url: String,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition(IntentStatus::Pending)?;
        if external_ref.is_some() {
            self.external_ref = external_ref;
        }
        self.checkout_url = Some(checkout_url);
        self.updated_at = now;
        Ok(())
    }

    /// Marks the intent failed. Settled and expired intents are untouched.
    ///
    /// Returns true if the status changed.
    pub fn mark_failed(&mut self, now: Timestamp) -> bool {
        if self.status.can_transition_to(&IntentStatus::Failed) {
            self.status = IntentStatus::Failed;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Marks an unsettled intent expired. Returns true if the status changed.
    pub fn mark_expired(&mut self, now: Timestamp) -> bool {
        if !self.is_settled() && self.status.can_transition_to(&IntentStatus::Expired) {
            self.status = IntentStatus::Expired;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Stamps the ledger transaction. Only valid once.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if already settled, `InvalidStateTransition` otherwise.
    pub fn settle(
        &mut self,
        transaction_id: TransactionId,
        external_ref: Option<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if self.is_settled() {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Intent {} is already settled", self.order_id),
            ));
        }
        self.transition(IntentStatus::Settled)?;
        self.ledger_transaction_id = Some(transaction_id);
        if self.external_ref.is_none() {
            self.external_ref = external_ref;
        }
        self.settled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, target: IntentStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|e| {
            DomainError::new(ErrorCode::InvalidStateTransition, e.to_string())
                .with_detail("order_id", self.order_id.as_str())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(now: Timestamp) -> PaymentIntent {
        PaymentIntent::open(
            OrderId::new("k42_a1b2c3").unwrap(),
            Processor::KassaAi,
            UserId::new(42),
            50_000,
            Currency::Rub,
            DEFAULT_INTENT_TTL_SECS,
            IntentMetadata::balance_topup(UserId::new(42), "Top-up", "ru"),
            now,
        )
        .unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Status machine
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn failed_intent_can_still_settle() {
        assert!(IntentStatus::Failed.can_transition_to(&IntentStatus::Settled));
    }

    #[test]
    fn settled_and_expired_are_terminal() {
        assert!(IntentStatus::Settled.is_terminal());
        assert!(IntentStatus::Expired.is_terminal());
        assert!(!IntentStatus::Pending.is_terminal());
    }

    #[test]
    fn confirmation_racing_checkout_can_settle_created_intent() {
        assert!(IntentStatus::Created.can_transition_to(&IntentStatus::Settled));
        assert!(IntentStatus::Settled.transition_to(IntentStatus::Pending).is_err());
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            IntentStatus::Created,
            IntentStatus::Pending,
            IntentStatus::Settled,
            IntentStatus::Failed,
            IntentStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Aggregate behaviour
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn open_rejects_non_positive_amount() {
        let result = PaymentIntent::open(
            OrderId::new("k1_000000").unwrap(),
            Processor::KassaAi,
            UserId::new(1),
            0,
            Currency::Rub,
            60,
            IntentMetadata::balance_topup(UserId::new(1), "", "ru"),
            Timestamp::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn settle_sets_transaction_once() {
        let now = Timestamp::now();
        let mut intent = intent(now);
        intent.mark_pending(Some("ext-1".into()), "https://pay/1".into(), now).unwrap();

        intent.settle(TransactionId::new(), None, now).unwrap();
        assert!(intent.is_settled());
        assert_eq!(intent.status, IntentStatus::Settled);

        let second = intent.settle(TransactionId::new(), None, now);
        assert_eq!(second.unwrap_err().code, ErrorCode::Conflict);
    }

    #[test]
    fn settle_keeps_known_external_ref() {
        let now = Timestamp::now();
        let mut intent = intent(now);
        intent.mark_pending(Some("bill-1".into()), "https://pay/1".into(), now).unwrap();
        intent.settle(TransactionId::new(), Some("trs-9".into()), now).unwrap();
        assert_eq!(intent.external_ref.as_deref(), Some("bill-1"));
    }

    #[test]
    fn mark_failed_never_touches_settled_intent() {
        let now = Timestamp::now();
        let mut intent = intent(now);
        intent.mark_pending(None, "https://pay/1".into(), now).unwrap();
        intent.settle(TransactionId::new(), None, now).unwrap();

        assert!(!intent.mark_failed(now));
        assert_eq!(intent.status, IntentStatus::Settled);
    }

    #[test]
    fn public_status_hides_failures() {
        let now = Timestamp::now();
        let mut intent = intent(now);
        intent.mark_failed(now);
        assert_eq!(intent.public_status(&now), PublicStatus::Pending);
        assert_eq!(
            intent.public_status(&now.plus_secs(DEFAULT_INTENT_TTL_SECS + 1)),
            PublicStatus::Expired
        );
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let now = Timestamp::now();
        let intent = intent(now);
        assert!(!intent.is_expired_at(&intent.expires_at));
        assert!(intent.is_expired_at(&intent.expires_at.plus_secs(1)));
    }
}

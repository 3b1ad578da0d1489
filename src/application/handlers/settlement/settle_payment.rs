//! SettlementEngine - turns verified payment events into ledger facts, once.
//!
//! Webhook handlers and the reconciliation poller both call
//! [`SettlementEngine::settle`]. The engine checks in this order:
//!
//! 1. Unverified events are rejected
//! 2. Unknown orders are `NotFound`
//! 3. An event from another processor is rejected
//! 4. A settled intent is `AlreadySettled`
//! 5. Non-paid events are recorded and acknowledged
//! 6. Amount outside tolerance is rejected
//! 7. Expired intents are rejected
//! 8. The store's conditional commit decides the race
//!
//! Only the commit in step 8 is authoritative. Steps 4 and 7 are early exits
//! that the store re-checks atomically.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::foundation::{ErrorCode, Timestamp};
use crate::domain::settlement::{
    LedgerTransaction, PaymentState, RejectReason, SettlementError, SettlementEvent,
    SettlementOutcome, TolerancePolicy, Trigger,
};
use crate::ports::{CommitResult, PaymentIntentStore, SettledPayment, SettlementListener};

/// The idempotent settlement core.
pub struct SettlementEngine {
    store: Arc<dyn PaymentIntentStore>,
    tolerance: TolerancePolicy,
    listener: Arc<dyn SettlementListener>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn PaymentIntentStore>,
        tolerance: TolerancePolicy,
        listener: Arc<dyn SettlementListener>,
    ) -> Self {
        Self {
            store,
            tolerance,
            listener,
        }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns `SettlementError::Store` when the store could not be reached.
    /// Every refusal is an `Ok` outcome.
    pub async fn settle(
        &self,
        event: &SettlementEvent,
        trigger: Trigger,
    ) -> Result<SettlementOutcome, SettlementError> {
        let order_id = event.order_id.as_str();
        let processor = event.processor.slug();

        if !event.verified {
            warn!(order_id, processor, %trigger, "Refusing unverified settlement event");
            return Ok(SettlementOutcome::Rejected(RejectReason::Unverified));
        }

        let intent = match self.store.find(&event.order_id).await {
            Ok(Some(intent)) => intent,
            Ok(None) => {
                warn!(order_id, processor, %trigger, "Settlement event for unknown order");
                return Ok(SettlementOutcome::NotFound);
            }
            Err(err) => {
                error!(order_id, processor, error = %err, "Failed to load payment intent");
                return Err(err.into());
            }
        };

        if intent.processor != event.processor {
            warn!(
                order_id,
                processor,
                intent_processor = intent.processor.slug(),
                "Settlement event from a different processor"
            );
            return Ok(SettlementOutcome::Rejected(RejectReason::ProcessorMismatch));
        }

        if intent.is_settled() {
            info!(order_id, processor, %trigger, "Payment already settled");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let now = Timestamp::now();

        match event.state {
            PaymentState::Paid => {}
            PaymentState::Pending => return Ok(SettlementOutcome::Acknowledged),
            PaymentState::Failed => {
                let changed = self.store.mark_failed(&event.order_id, now).await?;
                info!(order_id, processor, %trigger, changed, raw_status = %event.raw_status, "Payment attempt failed");
                return Ok(SettlementOutcome::Acknowledged);
            }
        }

        if !self.tolerance.matches(
            intent.processor,
            intent.amount_minor,
            intent.currency,
            event.amount_minor,
            event.currency,
        ) {
            warn!(
                order_id,
                processor,
                expected = intent.amount_minor,
                expected_currency = intent.currency.code(),
                actual = event.amount_minor,
                actual_currency = event.currency.code(),
                "Amount mismatch, flagged for manual review"
            );
            return Ok(SettlementOutcome::Rejected(RejectReason::AmountMismatch {
                expected: intent.amount_minor,
                actual: event.amount_minor,
            }));
        }

        if !intent.is_settleable_at(&now) {
            warn!(order_id, processor, %trigger, expires_at = %intent.expires_at, "Verified event for expired intent");
            return Ok(SettlementOutcome::Rejected(RejectReason::Expired));
        }

        let transaction = LedgerTransaction::deposit(&intent, event, now);
        let commit = self
            .store
            .commit_settlement(
                &event.order_id,
                &transaction,
                event.external_ref.as_deref(),
                now,
            )
            .await;

        match commit {
            Ok(CommitResult::Committed) => {}
            Ok(CommitResult::AlreadySettled) => {
                info!(order_id, processor, %trigger, "Lost settlement race, already settled");
                return Ok(SettlementOutcome::AlreadySettled);
            }
            Ok(CommitResult::Expired) => {
                warn!(order_id, processor, %trigger, "Intent expired before commit");
                return Ok(SettlementOutcome::Rejected(RejectReason::Expired));
            }
            Ok(CommitResult::Missing) => return Ok(SettlementOutcome::NotFound),
            Err(err) if err.code == ErrorCode::Conflict => {
                warn!(
                    order_id,
                    processor,
                    external_ref = ?event.external_ref,
                    "Processor reference already recorded for another order"
                );
                return Ok(SettlementOutcome::Rejected(RejectReason::DuplicateReference));
            }
            Err(err) => {
                error!(order_id, processor, error = %err, "Settlement commit failed");
                return Err(err.into());
            }
        }

        info!(
            order_id,
            processor,
            %trigger,
            transaction_id = %transaction.id,
            user_id = %intent.user_id,
            amount_minor = transaction.amount_minor,
            "Payment settled"
        );

        let mut settled = intent;
        if let Err(err) = settled.settle(transaction.id, event.external_ref.clone(), now) {
            warn!(order_id, error = %err, "Settled intent copy out of sync with store");
        }
        let transaction_id = transaction.id;
        self.listener.on_settled(SettledPayment {
            intent: settled,
            transaction,
            trigger,
        });

        Ok(SettlementOutcome::Finalized { transaction_id })
    }
}

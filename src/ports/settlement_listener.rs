//! SettlementListener port - hand-off from the engine to post-settlement work.

use crate::domain::settlement::{LedgerTransaction, PaymentIntent, Trigger};

/// A payment that this process just finalized.
#[derive(Debug, Clone)]
pub struct SettledPayment {
    pub intent: PaymentIntent,
    pub transaction: LedgerTransaction,
    pub trigger: Trigger,
}

/// Receives finalized payments.
///
/// `on_settled` must return promptly and must not fail: the settlement is
/// already committed when it is called. Implementations spawn their work.
pub trait SettlementListener: Send + Sync {
    fn on_settled(&self, payment: SettledPayment);
}

/// Listener that drops every payment. Used where no side effects are wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSettlementListener;

impl SettlementListener for NoopSettlementListener {
    fn on_settled(&self, _payment: SettledPayment) {}
}

//! Settlement domain - payment intents, canonical events, ledger facts.
//!
//! Everything in here is processor-agnostic. Processor wire formats live in
//! `adapters::gateways` and are reduced to [`SettlementEvent`] there.

mod event;
mod intent;
mod ledger;
mod outcome;
mod processor;
mod promo;
mod tolerance;

pub use event::{PaymentState, SettlementEvent, Trigger};
pub use intent::{
    IntentMetadata, IntentStatus, PaymentIntent, PublicStatus, DEFAULT_INTENT_TTL_SECS,
};
pub use ledger::{referral_ref, LedgerKind, LedgerTransaction};
pub use outcome::{RejectReason, SettlementError, SettlementOutcome};
pub use processor::Processor;
pub use promo::{PromoLadder, PromoTier};
pub use tolerance::{AmountTolerance, TolerancePolicy};

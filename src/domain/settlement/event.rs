//! Canonical settlement event produced by every gateway adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{Currency, OrderId};

use super::Processor;

/// Normalized payment state derived from a processor's raw status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Paid,
    Pending,
    Failed,
}

/// How an event reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Webhook,
    Poll,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Webhook => write!(f, "webhook"),
            Trigger::Poll => write!(f, "poll"),
        }
    }
}

/// Processor-independent description of one payment confirmation.
///
/// Adapters only hand out events with `verified = true`; the flag exists so
/// the engine can refuse anything built outside a verification path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub order_id: OrderId,
    pub processor: Processor,
    pub external_ref: Option<String>,
    pub amount_minor: i64,
    pub currency: Currency,
    pub raw_status: String,
    pub state: PaymentState,
    pub verified: bool,
}

impl SettlementEvent {
    /// Builds a verified event.
    pub fn verified(
        processor: Processor,
        order_id: OrderId,
        external_ref: Option<String>,
        amount_minor: i64,
        currency: Currency,
        raw_status: impl Into<String>,
        state: PaymentState,
    ) -> Self {
        Self {
            order_id,
            processor,
            external_ref: external_ref.filter(|r| !r.is_empty()),
            amount_minor,
            currency,
            raw_status: raw_status.into(),
            state,
            verified: true,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.state == PaymentState::Paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_constructor_drops_empty_external_ref() {
        let event = SettlementEvent::verified(
            Processor::Pal24,
            OrderId::new("p1_abcdef").unwrap(),
            Some(String::new()),
            100,
            Currency::Rub,
            "SUCCESS",
            PaymentState::Paid,
        );
        assert!(event.verified);
        assert!(event.external_ref.is_none());
        assert!(event.is_paid());
    }

    #[test]
    fn trigger_displays_lowercase() {
        assert_eq!(Trigger::Poll.to_string(), "poll");
    }
}

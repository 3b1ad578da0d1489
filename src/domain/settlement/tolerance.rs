//! Amount tolerance policy.
//!
//! Processors that report amounts as floats can drift by one minor unit
//! after conversion; processors that report decimal strings must match
//! exactly. The policy is per processor, with optional config overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::foundation::Currency;

use super::Processor;

/// Permitted difference between reported and recorded amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountTolerance {
    Exact,
    MinorUnits(i64),
}

impl AmountTolerance {
    fn allowance(&self) -> i64 {
        match self {
            AmountTolerance::Exact => 0,
            AmountTolerance::MinorUnits(n) => n.abs(),
        }
    }

    /// Default tolerance for a processor's reporting format.
    pub fn default_for(processor: Processor) -> Self {
        match processor {
            Processor::KassaAi
            | Processor::Freekassa
            | Processor::CloudPayments
            | Processor::Wata => AmountTolerance::MinorUnits(1),
            Processor::Pal24 | Processor::CryptoBot => AmountTolerance::Exact,
        }
    }
}

/// Tolerance lookup for every processor.
#[derive(Debug, Clone, Default)]
pub struct TolerancePolicy {
    overrides: HashMap<Processor, AmountTolerance>,
}

impl TolerancePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default tolerance for one processor.
    pub fn with_override(mut self, processor: Processor, tolerance: AmountTolerance) -> Self {
        self.overrides.insert(processor, tolerance);
        self
    }

    pub fn tolerance_for(&self, processor: Processor) -> AmountTolerance {
        self.overrides
            .get(&processor)
            .copied()
            .unwrap_or_else(|| AmountTolerance::default_for(processor))
    }

    /// True if the reported amount is acceptable for the recorded one.
    ///
    /// A currency mismatch never matches.
    pub fn matches(
        &self,
        processor: Processor,
        expected_minor: i64,
        expected_currency: Currency,
        actual_minor: i64,
        actual_currency: Currency,
    ) -> bool {
        if expected_currency != actual_currency {
            return false;
        }
        let allowance = self.tolerance_for(processor).allowance();
        (actual_minor - expected_minor).abs() <= allowance
    }
}

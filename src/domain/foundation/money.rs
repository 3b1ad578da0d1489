//! Currency and minor-unit amount conversion.
//!
//! Amounts are carried as `i64` minor units everywhere inside the crate.
//! Processors report in major units (decimal strings or JSON floats), so
//! conversion happens once at the adapter boundary with half-up rounding.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

/// Supported settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Rub,
    Usd,
    Eur,
    Irr,
    Tmn,
}

impl Currency {
    /// Number of decimal digits in one major unit.
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::Rub | Currency::Usd | Currency::Eur => 2,
            Currency::Irr | Currency::Tmn => 0,
        }
    }

    /// ISO-style code as processors expect it.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Irr => "IRR",
            Currency::Tmn => "TMN",
        }
    }

    fn scale(&self) -> Decimal {
        Decimal::from(10i64.pow(self.exponent()))
    }

    /// Converts a major-unit decimal into minor units, rounding half away from zero.
    pub fn to_minor(&self, major: Decimal) -> Result<i64, ValidationError> {
        major
            .checked_mul(self.scale())
            .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|rounded| rounded.to_i64())
            .ok_or_else(|| ValidationError::invalid_format("amount", "amount does not fit in minor units"))
    }

    /// Parses a major-unit decimal string such as `"500.00"` or `"500"`.
    pub fn parse_major(&self, raw: &str) -> Result<i64, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::empty_field("amount"));
        }
        let major = Decimal::from_str(trimmed)
            .map_err(|e| ValidationError::invalid_format("amount", e.to_string()))?;
        self.to_minor(major)
    }

    /// Converts a float major-unit amount, as reported by JSON-number processors.
    pub fn from_float_major(&self, major: f64) -> Result<i64, ValidationError> {
        if !major.is_finite() {
            return Err(ValidationError::invalid_format("amount", "amount is not finite"));
        }
        let decimal = Decimal::from_f64(major)
            .ok_or_else(|| ValidationError::invalid_format("amount", "amount is out of range"))?;
        self.to_minor(decimal)
    }

    /// Major-unit decimal for a minor-unit amount.
    pub fn to_major(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.exponent())
    }

    /// Major-unit float for processors that take JSON numbers.
    pub fn to_major_f64(&self, minor: i64) -> f64 {
        self.to_major(minor).to_f64().unwrap_or_default()
    }

    /// Formats a minor-unit amount with exactly `exponent` decimals, e.g. `"500.00"`.
    pub fn format_major(&self, minor: i64) -> String {
        self.to_major(minor).to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUB" | "RUR" => Ok(Currency::Rub),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "IRR" => Ok(Currency::Irr),
            "TMN" => Ok(Currency::Tmn),
            other => Err(ValidationError::invalid_format(
                "currency",
                format!("unsupported currency '{}'", other),
            )),
        }
    }
}

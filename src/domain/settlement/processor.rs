//! Payment processor identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// An external payment processor the system can settle through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Processor {
    #[serde(rename = "kassa-ai")]
    KassaAi,
    #[serde(rename = "freekassa")]
    Freekassa,
    #[serde(rename = "cloudpayments")]
    CloudPayments,
    #[serde(rename = "pal24")]
    Pal24,
    #[serde(rename = "wata")]
    Wata,
    #[serde(rename = "cryptobot")]
    CryptoBot,
}

impl Processor {
    /// Every supported processor.
    pub const ALL: [Processor; 6] = [
        Processor::KassaAi,
        Processor::Freekassa,
        Processor::CloudPayments,
        Processor::Pal24,
        Processor::Wata,
        Processor::CryptoBot,
    ];

    /// URL and storage slug, e.g. `kassa-ai`.
    pub fn slug(&self) -> &'static str {
        match self {
            Processor::KassaAi => "kassa-ai",
            Processor::Freekassa => "freekassa",
            Processor::CloudPayments => "cloudpayments",
            Processor::Pal24 => "pal24",
            Processor::Wata => "wata",
            Processor::CryptoBot => "cryptobot",
        }
    }

    /// Single-letter prefix of order ids created for this processor.
    pub fn order_prefix(&self) -> char {
        match self {
            Processor::KassaAi => 'k',
            Processor::Freekassa => 'f',
            Processor::CloudPayments => 'c',
            Processor::Pal24 => 'p',
            Processor::Wata => 'w',
            Processor::CryptoBot => 'b',
        }
    }

    /// Human-facing name used in ledger descriptions.
    pub fn display_name(&self) -> &'static str {
        match self {
            Processor::KassaAi => "KassaAI",
            Processor::Freekassa => "Freekassa",
            Processor::CloudPayments => "CloudPayments",
            Processor::Pal24 => "PayPalych",
            Processor::Wata => "WATA",
            Processor::CryptoBot => "CryptoBot",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for Processor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Processor::ALL
            .into_iter()
            .find(|p| p.slug() == needle)
            .ok_or_else(|| {
                ValidationError::invalid_format("processor", format!("unknown processor '{}'", s))
            })
    }
}

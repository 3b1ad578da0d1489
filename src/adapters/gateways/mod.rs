//! Payment processor adapters.
//!
//! Each adapter implements [`GatewayAdapter`](crate::ports::GatewayAdapter)
//! for one processor protocol. KassaAI and Freekassa share one adapter with
//! two profiles.
//!
//! | Slug | Adapter | Webhook signature |
//! |------|---------|-------------------|
//! | `kassa-ai`, `freekassa` | [`FreekassaAdapter`] | MD5 over `MERCHANT_ID:AMOUNT:secret2:ORDER_ID` |
//! | `cloudpayments` | [`CloudPaymentsAdapter`] | base64 HMAC-SHA256 of the body |
//! | `pal24` | [`Pal24Adapter`] | upper MD5 over `OutSum:InvId:token` |
//! | `wata` | [`WataAdapter`] | RSA PKCS#1 v1.5 SHA-512 over the body |
//! | `cryptobot` | [`CryptoBotAdapter`] | hex HMAC-SHA256 keyed by SHA-256(token) |

mod cloudpayments;
mod cryptobot;
mod freekassa;
mod http_client;
mod pal24;
mod registry;
mod signing;
mod wata;

pub use cloudpayments::{CloudPaymentsAdapter, CloudPaymentsCredentials};
pub use cryptobot::{CryptoBotAdapter, CryptoBotCredentials};
pub use freekassa::{FreekassaAdapter, FreekassaCredentials, FreekassaProfile};
pub use http_client::GatewayHttpClient;
pub use pal24::{Pal24Adapter, Pal24Credentials};
pub use registry::build_registry;
pub use signing::IpAllowList;
pub use wata::{WataAdapter, WataCredentials};

use serde_json::Value;
use std::time::Duration;

use crate::domain::foundation::Currency;
use crate::domain::settlement::DEFAULT_INTENT_TTL_SECS;
use crate::ports::AmountLimits;

/// Settings every adapter carries regardless of protocol.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_base_url: String,
    pub limits: AmountLimits,
    pub currency: Currency,
    pub intent_ttl_secs: i64,
    pub request_timeout: Duration,
}

impl GatewaySettings {
    pub fn new(api_base_url: impl Into<String>, limits: AmountLimits) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            limits,
            currency: Currency::Rub,
            intent_ttl_secs: DEFAULT_INTENT_TTL_SECS,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_intent_ttl_secs(mut self, ttl: i64) -> Self {
        self.intent_ttl_secs = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Minor units from a JSON amount that may be a number or a decimal string.
pub(crate) fn minor_from_json(value: &Value, currency: Currency) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(|f| currency.from_float_major(f).ok()),
        Value::String(s) => currency.parse_major(s).ok(),
        _ => None,
    }
}

/// Plain text of a scalar JSON value.
pub(crate) fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_amounts_accept_numbers_and_strings() {
        assert_eq!(minor_from_json(&json!(500.5), Currency::Rub), Some(50_050));
        assert_eq!(minor_from_json(&json!("500.00"), Currency::Rub), Some(50_000));
        assert_eq!(minor_from_json(&json!(1200), Currency::Irr), Some(1_200));
        assert_eq!(minor_from_json(&json!(null), Currency::Rub), None);
        assert_eq!(minor_from_json(&json!("abc"), Currency::Rub), None);
    }

    #[test]
    fn json_text_covers_scalars_only() {
        assert_eq!(json_text(&json!(42)), Some("42".to_string()));
        assert_eq!(json_text(&json!("x")), Some("x".to_string()));
        assert_eq!(json_text(&json!([1])), None);
    }
}

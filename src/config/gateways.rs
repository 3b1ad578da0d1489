//! Payment processor configuration
//!
//! One optional section per processor. A processor is registered only when
//! its section is present and `enabled` is not set to false.
//!
//! ```text
//! TOLLGATE__GATEWAYS__FREEKASSA__SHOP_ID=777
//! TOLLGATE__GATEWAYS__FREEKASSA__API_KEY=...
//! TOLLGATE__GATEWAYS__FREEKASSA__SECRET_WORD_2=...
//! TOLLGATE__GATEWAYS__FREEKASSA__MIN_AMOUNT_MINOR=10000
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::domain::foundation::Currency;
use crate::domain::settlement::{AmountTolerance, Processor, TolerancePolicy, DEFAULT_INTENT_TTL_SECS};

use super::error::ValidationError;

/// Settings shared by every processor plus the union of credential fields.
///
/// Which credential fields are required depends on the processor; see
/// [`GatewaySection::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Overrides the processor's public API base URL
    pub api_base_url: Option<String>,

    #[serde(default = "default_min_amount")]
    pub min_amount_minor: i64,

    #[serde(default = "default_max_amount")]
    pub max_amount_minor: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_intent_ttl")]
    pub intent_ttl_secs: i64,

    /// Replaces the processor's default amount tolerance (0 = exact)
    pub tolerance_minor: Option<i64>,

    /// Freekassa/KassaAI comma-separated webhook source addresses. An empty
    /// string disables the built-in Freekassa list.
    pub allowed_ips: Option<String>,

    /// Freekassa/KassaAI numeric shop id, Pal24 shop id
    pub shop_id: Option<String>,

    /// Freekassa/KassaAI API key
    pub api_key: Option<SecretString>,

    /// Freekassa/KassaAI notification secret
    pub secret_word_2: Option<SecretString>,

    /// Freekassa/KassaAI payment method (`i` parameter)
    pub payment_system_id: Option<i64>,

    /// CloudPayments public id
    pub public_id: Option<String>,

    /// CloudPayments API secret
    pub api_secret: Option<SecretString>,

    /// Pal24, WATA and CryptoBot API token
    pub api_token: Option<SecretString>,

    /// WATA webhook verification key (PEM); fetched from the API when absent
    pub public_key_pem: Option<String>,
}

impl GatewaySection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn currency(&self) -> Result<Currency, ValidationError> {
        self.currency
            .parse::<Currency>()
            .map_err(|_| ValidationError::InvalidCurrency("gateways", self.currency.clone()))
    }

    /// Parsed allow-list. `None` means "use the processor default".
    pub fn allowed_ips(&self) -> Result<Option<Vec<IpAddr>>, ValidationError> {
        let Some(raw) = &self.allowed_ips else {
            return Ok(None);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ValidationError::InvalidIpAddress("gateways.allowed_ips", s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn secret(field: &Option<SecretString>, name: &'static str) -> Result<SecretString, ValidationError> {
        field
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
            .cloned()
            .ok_or(ValidationError::MissingRequired(name))
    }

    pub fn text(field: &Option<String>, name: &'static str) -> Result<String, ValidationError> {
        field
            .as_ref()
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or(ValidationError::MissingRequired(name))
    }

    /// Checks shared settings and the credentials `processor` needs.
    pub fn validate(&self, processor: Processor) -> Result<(), ValidationError> {
        if self.min_amount_minor <= 0 {
            return Err(ValidationError::MustBePositive("gateways.min_amount_minor"));
        }
        if self.min_amount_minor > self.max_amount_minor {
            return Err(ValidationError::InvalidAmountRange(processor.slug()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("gateways.request_timeout_secs"));
        }
        if self.intent_ttl_secs <= 0 {
            return Err(ValidationError::MustBePositive("gateways.intent_ttl_secs"));
        }
        if let Some(url) = &self.api_base_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ValidationError::InvalidUrl("gateways.api_base_url"));
            }
        }
        self.currency()?;
        self.allowed_ips()?;

        match processor {
            Processor::KassaAi | Processor::Freekassa => {
                Self::text(&self.shop_id, "gateways.shop_id")?
                    .parse::<i64>()
                    .map_err(|_| ValidationError::MissingRequired("gateways.shop_id"))?;
                Self::secret(&self.api_key, "gateways.api_key")?;
                Self::secret(&self.secret_word_2, "gateways.secret_word_2")?;
            }
            Processor::CloudPayments => {
                Self::text(&self.public_id, "gateways.public_id")?;
                Self::secret(&self.api_secret, "gateways.api_secret")?;
            }
            Processor::Pal24 => {
                Self::text(&self.shop_id, "gateways.shop_id")?;
                Self::secret(&self.api_token, "gateways.api_token")?;
            }
            Processor::Wata | Processor::CryptoBot => {
                Self::secret(&self.api_token, "gateways.api_token")?;
            }
        }
        Ok(())
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            api_base_url: None,
            min_amount_minor: default_min_amount(),
            max_amount_minor: default_max_amount(),
            currency: default_currency(),
            request_timeout_secs: default_request_timeout(),
            intent_ttl_secs: default_intent_ttl(),
            tolerance_minor: None,
            allowed_ips: None,
            shop_id: None,
            api_key: None,
            secret_word_2: None,
            payment_system_id: None,
            public_id: None,
            api_secret: None,
            api_token: None,
            public_key_pem: None,
        }
    }
}

/// All processor sections
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaysConfig {
    pub kassa_ai: Option<GatewaySection>,
    pub freekassa: Option<GatewaySection>,
    pub cloudpayments: Option<GatewaySection>,
    pub pal24: Option<GatewaySection>,
    pub wata: Option<GatewaySection>,
    pub cryptobot: Option<GatewaySection>,
}

impl GatewaysConfig {
    pub fn section(&self, processor: Processor) -> Option<&GatewaySection> {
        let section = match processor {
            Processor::KassaAi => &self.kassa_ai,
            Processor::Freekassa => &self.freekassa,
            Processor::CloudPayments => &self.cloudpayments,
            Processor::Pal24 => &self.pal24,
            Processor::Wata => &self.wata,
            Processor::CryptoBot => &self.cryptobot,
        };
        section.as_ref().filter(|s| s.enabled)
    }

    /// Enabled processors with their sections, in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = (Processor, &GatewaySection)> {
        Processor::ALL
            .into_iter()
            .filter_map(|p| self.section(p).map(|s| (p, s)))
    }

    /// Default tolerances with any configured overrides applied.
    pub fn tolerance_policy(&self) -> TolerancePolicy {
        self.enabled()
            .fold(TolerancePolicy::new(), |policy, (processor, section)| {
                match section.tolerance_minor {
                    Some(0) => policy.with_override(processor, AmountTolerance::Exact),
                    Some(n) => policy.with_override(processor, AmountTolerance::MinorUnits(n)),
                    None => policy,
                }
            })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (processor, section) in self.enabled() {
            section.validate(processor)?;
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_min_amount() -> i64 {
    10_000
}

fn default_max_amount() -> i64 {
    10_000_000
}

fn default_currency() -> String {
    "RUB".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_intent_ttl() -> i64 {
    DEFAULT_INTENT_TTL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> Option<SecretString> {
        Some(SecretString::new(value.to_string()))
    }

    fn freekassa_section() -> GatewaySection {
        GatewaySection {
            shop_id: Some("777".to_string()),
            api_key: secret("api-key"),
            secret_word_2: secret("s3cret2"),
            ..Default::default()
        }
    }

    #[test]
    fn test_section_defaults() {
        let section = GatewaySection::default();
        assert!(section.enabled);
        assert_eq!(section.min_amount_minor, 10_000);
        assert_eq!(section.currency().unwrap(), Currency::Rub);
        assert_eq!(section.request_timeout(), Duration::from_secs(15));
        assert_eq!(section.allowed_ips().unwrap(), None);
    }

    #[test]
    fn test_freekassa_requires_numeric_shop_id() {
        let section = GatewaySection {
            shop_id: Some("shop".to_string()),
            ..freekassa_section()
        };
        assert!(section.validate(Processor::Freekassa).is_err());
        assert!(freekassa_section().validate(Processor::Freekassa).is_ok());
    }

    #[test]
    fn test_missing_credentials_are_named() {
        let section = GatewaySection::default();
        assert_eq!(
            section.validate(Processor::CryptoBot),
            Err(ValidationError::MissingRequired("gateways.api_token"))
        );
        assert_eq!(
            section.validate(Processor::CloudPayments),
            Err(ValidationError::MissingRequired("gateways.public_id"))
        );
    }

    #[test]
    fn test_min_above_max_is_rejected() {
        let section = GatewaySection {
            min_amount_minor: 50_000,
            max_amount_minor: 40_000,
            ..freekassa_section()
        };
        assert_eq!(
            section.validate(Processor::Freekassa),
            Err(ValidationError::InvalidAmountRange("freekassa"))
        );
    }

    #[test]
    fn test_allowed_ips_parsing() {
        let section = GatewaySection {
            allowed_ips: Some("10.0.0.1, 10.0.0.2".to_string()),
            ..Default::default()
        };
        assert_eq!(section.allowed_ips().unwrap().unwrap().len(), 2);

        let empty = GatewaySection {
            allowed_ips: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(empty.allowed_ips().unwrap(), Some(vec![]));

        let bad = GatewaySection {
            allowed_ips: Some("10.0.0.300".to_string()),
            ..Default::default()
        };
        assert!(bad.allowed_ips().is_err());
    }

    #[test]
    fn test_disabled_sections_are_skipped() {
        let config = GatewaysConfig {
            freekassa: Some(freekassa_section()),
            cryptobot: Some(GatewaySection {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        let enabled: Vec<_> = config.enabled().map(|(p, _)| p).collect();
        assert_eq!(enabled, vec![Processor::Freekassa]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tolerance_overrides() {
        let config = GatewaysConfig {
            freekassa: Some(GatewaySection {
                tolerance_minor: Some(0),
                ..freekassa_section()
            }),
            ..Default::default()
        };
        let policy = config.tolerance_policy();
        assert_eq!(policy.tolerance_for(Processor::Freekassa), AmountTolerance::Exact);
        assert_eq!(
            policy.tolerance_for(Processor::CloudPayments),
            AmountTolerance::MinorUnits(1)
        );
    }
}

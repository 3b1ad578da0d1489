//! Builds the gateway registry from configuration.

use std::sync::Arc;
use tracing::info;

use crate::config::{GatewaySection, GatewaysConfig, ValidationError};
use crate::domain::settlement::Processor;
use crate::ports::{AmountLimits, GatewayAdapter, GatewayRegistry};

use super::cloudpayments::{self, CloudPaymentsAdapter, CloudPaymentsCredentials};
use super::cryptobot::{self, CryptoBotAdapter, CryptoBotCredentials};
use super::freekassa::{FreekassaAdapter, FreekassaCredentials, FreekassaProfile};
use super::pal24::{self, Pal24Adapter, Pal24Credentials};
use super::wata::{self, WataAdapter, WataCredentials};
use super::GatewaySettings;

fn settings(section: &GatewaySection, default_url: &str) -> Result<GatewaySettings, ValidationError> {
    let url = section
        .api_base_url
        .clone()
        .unwrap_or_else(|| default_url.to_string());
    Ok(GatewaySettings::new(
        url,
        AmountLimits {
            min_minor: section.min_amount_minor,
            max_minor: section.max_amount_minor,
        },
    )
    .with_currency(section.currency()?)
    .with_intent_ttl_secs(section.intent_ttl_secs)
    .with_request_timeout(section.request_timeout()))
}

fn build_adapter(
    processor: Processor,
    section: &GatewaySection,
) -> Result<Arc<dyn GatewayAdapter>, ValidationError> {
    section.validate(processor)?;

    let adapter: Arc<dyn GatewayAdapter> = match processor {
        Processor::KassaAi | Processor::Freekassa => {
            let profile = if processor == Processor::KassaAi {
                FreekassaProfile::kassa_ai()
            } else {
                FreekassaProfile::freekassa()
            };
            let shop_id = GatewaySection::text(&section.shop_id, "gateways.shop_id")?
                .parse::<i64>()
                .map_err(|_| ValidationError::MissingRequired("gateways.shop_id"))?;
            let credentials = FreekassaCredentials {
                shop_id,
                api_key: GatewaySection::secret(&section.api_key, "gateways.api_key")?,
                secret_word_2: GatewaySection::secret(&section.secret_word_2, "gateways.secret_word_2")?,
                payment_system_id: section.payment_system_id,
            };
            Arc::new(FreekassaAdapter::new(
                profile,
                credentials,
                settings(section, profile.default_api_base_url)?,
                section.allowed_ips()?,
            ))
        }
        Processor::CloudPayments => Arc::new(CloudPaymentsAdapter::new(
            CloudPaymentsCredentials {
                public_id: GatewaySection::text(&section.public_id, "gateways.public_id")?,
                api_secret: GatewaySection::secret(&section.api_secret, "gateways.api_secret")?,
            },
            settings(section, cloudpayments::DEFAULT_API_BASE_URL)?,
        )),
        Processor::Pal24 => Arc::new(Pal24Adapter::new(
            Pal24Credentials {
                shop_id: GatewaySection::text(&section.shop_id, "gateways.shop_id")?,
                api_token: GatewaySection::secret(&section.api_token, "gateways.api_token")?,
            },
            settings(section, pal24::DEFAULT_API_BASE_URL)?,
        )),
        Processor::Wata => Arc::new(WataAdapter::new(
            WataCredentials {
                access_token: GatewaySection::secret(&section.api_token, "gateways.api_token")?,
                public_key_pem: section.public_key_pem.clone().filter(|pem| !pem.trim().is_empty()),
            },
            settings(section, wata::DEFAULT_API_BASE_URL)?,
        )),
        Processor::CryptoBot => Arc::new(CryptoBotAdapter::new(
            CryptoBotCredentials {
                api_token: GatewaySection::secret(&section.api_token, "gateways.api_token")?,
            },
            settings(section, cryptobot::DEFAULT_API_BASE_URL)?,
        )),
    };
    Ok(adapter)
}

/// One adapter per enabled processor section.
///
/// # Errors
///
/// The first section that fails validation.
pub fn build_registry(config: &GatewaysConfig) -> Result<GatewayRegistry, ValidationError> {
    let mut registry = GatewayRegistry::new();
    for (processor, section) in config.enabled() {
        registry.register(build_adapter(processor, section)?);
        info!(processor = processor.slug(), "Gateway registered");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn secret(value: &str) -> Option<SecretString> {
        Some(SecretString::new(value.to_string()))
    }

    #[test]
    fn registers_only_configured_processors() {
        let config = GatewaysConfig {
            kassa_ai: Some(GatewaySection {
                shop_id: Some("777".to_string()),
                api_key: secret("api-key"),
                secret_word_2: secret("s3cret2"),
                ..Default::default()
            }),
            cryptobot: Some(GatewaySection {
                api_token: secret("cb-token"),
                min_amount_minor: 5_000,
                ..Default::default()
            }),
            ..Default::default()
        };

        let registry = build_registry(&config).unwrap();

        assert_eq!(registry.processors(), vec![Processor::KassaAi, Processor::CryptoBot]);
        assert!(registry.by_slug("kassa-ai").is_some());
        assert!(registry.by_slug("freekassa").is_none());
        let cryptobot = registry.get(Processor::CryptoBot).unwrap();
        assert_eq!(cryptobot.amount_limits().min_minor, 5_000);
    }

    #[test]
    fn incomplete_section_fails_the_build() {
        let config = GatewaysConfig {
            wata: Some(GatewaySection::default()),
            ..Default::default()
        };

        assert_eq!(
            build_registry(&config).err(),
            Some(ValidationError::MissingRequired("gateways.api_token"))
        );
    }

    #[test]
    fn empty_config_gives_empty_registry() {
        assert!(build_registry(&GatewaysConfig::default()).unwrap().is_empty());
    }
}

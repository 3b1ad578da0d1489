//! Post-settlement side-effect configuration

use serde::Deserialize;
use std::time::Duration;

use crate::application::side_effects::RetryPolicy;
use crate::domain::settlement::{PromoLadder, PromoTier};

use super::error::ValidationError;

/// Side-effect stage settings and collaborator callbacks
#[derive(Debug, Clone, Deserialize)]
pub struct SideEffectsConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Referrer commission on each deposit, 0 disables rewards
    #[serde(default)]
    pub referral_percent: u32,

    /// Comma-separated `name:threshold_minor` pairs, e.g. `silver:100000,gold:500000`
    pub promo_tiers: Option<String>,

    /// POST target for user notices; notices are only logged when unset
    pub user_notify_url: Option<String>,

    /// POST target for operator notices; notices are only logged when unset
    pub admin_notify_url: Option<String>,

    /// POST target that completes saved carts
    pub cart_resume_url: Option<String>,

    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// How long shutdown waits for running pipelines
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl SideEffectsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn promo_ladder(&self) -> Result<PromoLadder, ValidationError> {
        let Some(raw) = &self.promo_tiers else {
            return Ok(PromoLadder::default());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, threshold) = entry
                    .split_once(':')
                    .ok_or_else(|| ValidationError::InvalidPromoTier(entry.to_string()))?;
                let threshold_minor = threshold
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ValidationError::InvalidPromoTier(entry.to_string()))?;
                if name.trim().is_empty() || threshold_minor < 0 {
                    return Err(ValidationError::InvalidPromoTier(entry.to_string()));
                }
                Ok(PromoTier {
                    name: name.trim().to_string(),
                    threshold_minor,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(PromoLadder::new)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MustBePositive("side_effects.max_attempts"));
        }
        if self.referral_percent > 100 {
            return Err(ValidationError::InvalidReferralPercent);
        }
        for (name, url) in [
            ("side_effects.user_notify_url", &self.user_notify_url),
            ("side_effects.admin_notify_url", &self.admin_notify_url),
            ("side_effects.cart_resume_url", &self.cart_resume_url),
        ] {
            if let Some(url) = url {
                if url::Url::parse(url).is_err() {
                    return Err(ValidationError::InvalidUrl(name));
                }
            }
        }
        self.promo_ladder()?;
        Ok(())
    }
}

impl Default for SideEffectsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            referral_percent: 0,
            promo_tiers: None,
            user_notify_url: None,
            admin_notify_url: None,
            cart_resume_url: None,
            callback_timeout_secs: default_callback_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_callback_timeout() -> u64 {
    10
}

fn default_drain_timeout() -> u64 {
    30
}

//! Provisioning panel configuration

use secrecy::SecretString;
use serde::Deserialize;

use crate::application::handlers::subscription::PanelNoticePolicy;
use crate::domain::subscription::NoticeCategory;

use super::error::ValidationError;

/// Panel webhook and API settings
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    /// Webhook HMAC secret. The webhook endpoint answers 503 while unset.
    pub webhook_secret: Option<SecretString>,

    /// Panel API base URL, e.g. `https://panel.example.com`
    pub api_base_url: Option<String>,

    /// Panel API bearer token
    pub api_token: Option<SecretString>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Window during which a webhook stamp wins over sync snapshots
    #[serde(default = "default_sync_guard")]
    pub sync_guard_secs: i64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub notifications: PanelNotificationsConfig,
}

/// User notification switches for panel events
#[derive(Debug, Clone, Deserialize)]
pub struct PanelNotificationsConfig {
    #[serde(default = "default_on")]
    pub enabled: bool,
    #[serde(default = "default_on")]
    pub expired: bool,
    #[serde(default = "default_on")]
    pub disabled: bool,
    #[serde(default = "default_on")]
    pub enabled_again: bool,
    #[serde(default = "default_on")]
    pub limited: bool,
    #[serde(default = "default_on")]
    pub traffic_reset: bool,
    #[serde(default = "default_on")]
    pub deleted: bool,
    #[serde(default = "default_on")]
    pub revoked: bool,
    #[serde(default = "default_on")]
    pub expiring: bool,
    #[serde(default = "default_on")]
    pub first_connected: bool,
    #[serde(default = "default_on")]
    pub bandwidth: bool,
    #[serde(default = "default_on")]
    pub not_connected: bool,
    #[serde(default = "default_on")]
    pub devices: bool,
}

impl PanelNotificationsConfig {
    pub fn policy(&self) -> PanelNoticePolicy {
        let base = if self.enabled {
            PanelNoticePolicy::default()
        } else {
            PanelNoticePolicy::disabled()
        };
        [
            (NoticeCategory::Expired, self.expired),
            (NoticeCategory::Disabled, self.disabled),
            (NoticeCategory::Enabled, self.enabled_again),
            (NoticeCategory::Limited, self.limited),
            (NoticeCategory::TrafficReset, self.traffic_reset),
            (NoticeCategory::Deleted, self.deleted),
            (NoticeCategory::Revoked, self.revoked),
            (NoticeCategory::Expiring, self.expiring),
            (NoticeCategory::FirstConnected, self.first_connected),
            (NoticeCategory::Bandwidth, self.bandwidth),
            (NoticeCategory::NotConnected, self.not_connected),
            (NoticeCategory::Devices, self.devices),
        ]
        .into_iter()
        .fold(base, |policy, (category, on)| policy.with_category(category, on))
    }
}

impl Default for PanelNotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expired: true,
            disabled: true,
            enabled_again: true,
            limited: true,
            traffic_reset: true,
            deleted: true,
            revoked: true,
            expiring: true,
            first_connected: true,
            bandwidth: true,
            not_connected: true,
            devices: true,
        }
    }
}

impl PanelConfig {
    /// True when the periodic sync can reach the panel API.
    pub fn api_configured(&self) -> bool {
        self.api_base_url.is_some() && self.api_token.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(url) = &self.api_base_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ValidationError::InvalidUrl("panel.api_base_url"));
            }
        }
        if self.max_body_bytes == 0 {
            return Err(ValidationError::MustBePositive("panel.max_body_bytes"));
        }
        if self.sync_guard_secs < 0 {
            return Err(ValidationError::MustBePositive("panel.sync_guard_secs"));
        }
        Ok(())
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            api_base_url: None,
            api_token: None,
            max_body_bytes: default_max_body_bytes(),
            sync_guard_secs: default_sync_guard(),
            request_timeout_secs: default_request_timeout(),
            notifications: PanelNotificationsConfig::default(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    65_536
}

fn default_sync_guard() -> i64 {
    60
}

fn default_request_timeout() -> u64 {
    15
}

fn default_on() -> bool {
    true
}

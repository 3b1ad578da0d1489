//! Provisioning panel webhook events.
//!
//! Event names are mapped once onto a tagged enum. Anything not in the
//! table becomes [`PanelEvent::Unknown`] and is acknowledged without effect.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::domain::foundation::PanelUserId;

/// Webhook body as delivered by the panel.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelEnvelope {
    pub scope: Option<String>,
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// User-scoped event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserEventKind {
    Expired,
    Disabled,
    Enabled,
    Limited,
    TrafficReset,
    Modified,
    Deleted,
    Revoked,
    Created,
    ExpiresIn72Hours,
    ExpiresIn48Hours,
    ExpiresIn24Hours,
    Expired24HoursAgo,
    FirstConnected,
    BandwidthThresholdReached,
    NotConnected,
}

/// Device (hwid) event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    Added,
    Deleted,
}

/// Infrastructure event forwarded to operators only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEvent {
    pub name: String,
    pub title: &'static str,
}

/// A dispatched panel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    User(UserEventKind),
    Device(DeviceEventKind),
    Admin(AdminEvent),
    Unknown(String),
}

const USER_EVENTS: &[(&str, UserEventKind)] = &[
    ("user.expired", UserEventKind::Expired),
    ("user.disabled", UserEventKind::Disabled),
    ("user.enabled", UserEventKind::Enabled),
    ("user.limited", UserEventKind::Limited),
    ("user.traffic_reset", UserEventKind::TrafficReset),
    ("user.modified", UserEventKind::Modified),
    ("user.deleted", UserEventKind::Deleted),
    ("user.revoked", UserEventKind::Revoked),
    ("user.created", UserEventKind::Created),
    ("user.expires_in_72_hours", UserEventKind::ExpiresIn72Hours),
    ("user.expires_in_48_hours", UserEventKind::ExpiresIn48Hours),
    ("user.expires_in_24_hours", UserEventKind::ExpiresIn24Hours),
    ("user.expired_24_hours_ago", UserEventKind::Expired24HoursAgo),
    ("user.first_connected", UserEventKind::FirstConnected),
    (
        "user.bandwidth_usage_threshold_reached",
        UserEventKind::BandwidthThresholdReached,
    ),
    ("user.not_connected", UserEventKind::NotConnected),
];

const DEVICE_EVENTS: &[(&str, DeviceEventKind)] = &[
    ("user_hwid_devices.added", DeviceEventKind::Added),
    ("user_hwid_devices.deleted", DeviceEventKind::Deleted),
];

const ADMIN_EVENTS: &[(&str, &str)] = &[
    ("node.created", "Node created"),
    ("node.modified", "Node modified"),
    ("node.disabled", "Node disabled"),
    ("node.enabled", "Node enabled"),
    ("node.deleted", "Node deleted"),
    ("node.connection_lost", "Node connection lost"),
    ("node.connection_restored", "Node connection restored"),
    ("node.traffic_notify", "Node traffic threshold"),
    ("service.panel_started", "Panel started"),
    ("service.login_attempt_failed", "Panel login failed"),
    ("service.login_attempt_success", "Panel login succeeded"),
    ("service.subpage_config_changed", "Subscription page config changed"),
    ("crm.infra_billing_node_payment_in_7_days", "Node payment due in 7 days"),
    ("crm.infra_billing_node_payment_in_48hrs", "Node payment due in 48 hours"),
    ("crm.infra_billing_node_payment_in_24hrs", "Node payment due in 24 hours"),
    ("crm.infra_billing_node_payment_due_today", "Node payment due today"),
    ("crm.infra_billing_node_payment_overdue_24hrs", "Node payment overdue 24 hours"),
    ("crm.infra_billing_node_payment_overdue_48hrs", "Node payment overdue 48 hours"),
    ("crm.infra_billing_node_payment_overdue_7_days", "Node payment overdue 7 days"),
    (
        "errors.bandwidth_usage_threshold_reached_max_notifications",
        "Bandwidth notification limit reached",
    ),
];

impl PanelEvent {
    /// Maps an event name onto its variant.
    pub fn from_name(name: &str) -> Self {
        if let Some((_, title)) = ADMIN_EVENTS.iter().find(|(n, _)| *n == name) {
            return PanelEvent::Admin(AdminEvent {
                name: name.to_string(),
                title,
            });
        }
        if let Some((_, kind)) = USER_EVENTS.iter().find(|(n, _)| *n == name) {
            return PanelEvent::User(*kind);
        }
        if let Some((_, kind)) = DEVICE_EVENTS.iter().find(|(n, _)| *n == name) {
            return PanelEvent::Device(*kind);
        }
        PanelEvent::Unknown(name.to_string())
    }
}

/// Per-category notification switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeCategory {
    Expired,
    Disabled,
    Enabled,
    Limited,
    TrafficReset,
    Deleted,
    Revoked,
    Expiring,
    FirstConnected,
    Bandwidth,
    NotConnected,
    Devices,
}

impl NoticeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeCategory::Expired => "expired",
            NoticeCategory::Disabled => "disabled",
            NoticeCategory::Enabled => "enabled",
            NoticeCategory::Limited => "limited",
            NoticeCategory::TrafficReset => "traffic_reset",
            NoticeCategory::Deleted => "deleted",
            NoticeCategory::Revoked => "revoked",
            NoticeCategory::Expiring => "expiring",
            NoticeCategory::FirstConnected => "first_connected",
            NoticeCategory::Bandwidth => "bandwidth",
            NoticeCategory::NotConnected => "not_connected",
            NoticeCategory::Devices => "devices",
        }
    }
}

impl fmt::Display for NoticeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl UserEventKind {
    /// Notice template for the user, if this event notifies at all.
    pub fn notice(&self) -> Option<(NoticeCategory, &'static str)> {
        use UserEventKind::*;
        let notice = match self {
            Expired => (NoticeCategory::Expired, "subscription_expired"),
            Disabled => (NoticeCategory::Disabled, "subscription_disabled"),
            Enabled => (NoticeCategory::Enabled, "subscription_enabled"),
            Limited => (NoticeCategory::Limited, "subscription_limited"),
            TrafficReset => (NoticeCategory::TrafficReset, "traffic_reset"),
            Deleted => (NoticeCategory::Deleted, "subscription_deleted"),
            Revoked => (NoticeCategory::Revoked, "credentials_revoked"),
            ExpiresIn72Hours => (NoticeCategory::Expiring, "expires_in_72_hours"),
            ExpiresIn48Hours => (NoticeCategory::Expiring, "expires_in_48_hours"),
            ExpiresIn24Hours => (NoticeCategory::Expiring, "expires_in_24_hours"),
            Expired24HoursAgo => (NoticeCategory::Expired, "expired_24_hours_ago"),
            FirstConnected => (NoticeCategory::FirstConnected, "first_connected"),
            BandwidthThresholdReached => (NoticeCategory::Bandwidth, "bandwidth_threshold"),
            NotConnected => (NoticeCategory::NotConnected, "not_connected"),
            Modified | Created => return None,
        };
        Some(notice)
    }
}

impl DeviceEventKind {
    pub fn notice_key(&self) -> &'static str {
        match self {
            DeviceEventKind::Added => "device_added",
            DeviceEventKind::Deleted => "device_deleted",
        }
    }
}

/// One way to find the local user an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup {
    TelegramId(i64),
    PanelUser(PanelUserId),
}

/// Candidate user references in resolution order.
///
/// Top-level `telegramId`, then `uuid` / `userUuid`, then the nested
/// `user.telegramId` and `user.uuid` used by device events.
pub fn user_lookups(data: &Value) -> Vec<UserLookup> {
    let mut lookups = Vec::new();
    if let Some(id) = telegram_id(data.get("telegramId")) {
        lookups.push(UserLookup::TelegramId(id));
    }
    for key in ["uuid", "userUuid"] {
        if let Some(uuid) = panel_uuid(data.get(key)) {
            lookups.push(UserLookup::PanelUser(uuid));
            break;
        }
    }
    if let Some(nested) = data.get("user").filter(|v| v.is_object()) {
        if let Some(id) = telegram_id(nested.get("telegramId")) {
            lookups.push(UserLookup::TelegramId(id));
        }
        if let Some(uuid) = panel_uuid(nested.get("uuid")) {
            lookups.push(UserLookup::PanelUser(uuid));
        }
    }
    lookups
}

fn telegram_id(value: Option<&Value>) -> Option<i64> {
    let id = match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.filter(|id| *id != 0)
}

fn panel_uuid(value: Option<&Value>) -> Option<PanelUserId> {
    value?.as_str()?.parse().ok()
}

/// Threshold percentage for bandwidth notices, digits and dots only.
pub fn bandwidth_percent(data: &Value) -> String {
    let raw = data
        .get("thresholdPercent")
        .or_else(|| data.get("threshold"))
        .or_else(|| data.get("meta").and_then(|m| m.get("thresholdPercent")))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        "80".to_string()
    } else {
        cleaned
    }
}

/// Readable device label: `tag (platform)`, falling back to a short hwid.
pub fn device_name(data: &Value) -> String {
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let Some(device) = data.get("hwidUserDevice").filter(|v| v.is_object()) else {
        return text(data.get("deviceName"))
            .or_else(|| text(data.get("tag")))
            .or_else(|| text(data.get("hwid")))
            .unwrap_or_default();
    };

    let tag = text(device.get("tag"))
        .or_else(|| text(device.get("deviceName")))
        .or_else(|| text(device.get("name")));
    let platform = text(device.get("platform"));
    let hwid = text(device.get("hwid"));
    let short = |h: &str, n: usize| h.chars().take(n).collect::<String>();

    match (tag, platform, hwid) {
        (Some(tag), Some(platform), _) => format!("{} ({})", tag, platform),
        (Some(tag), None, _) => tag,
        (None, Some(platform), Some(hwid)) => format!("{} ({})", platform, short(&hwid, 8)),
        (None, Some(platform), None) => platform,
        (None, None, Some(hwid)) => short(&hwid, 12),
        (None, None, None) => String::new(),
    }
}

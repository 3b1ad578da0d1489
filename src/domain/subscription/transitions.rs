//! Panel event to subscription patch mapping.
//!
//! Each user event kind maps to one pure function of the current row and
//! the event payload. The result is the minimal diff; the caller stamps
//! `last_external_update_at` separately, whether or not anything changed.

use serde_json::Value;

use crate::domain::foundation::Timestamp;

use super::{Subscription, SubscriptionPatch, SubscriptionStatus, UserEventKind};

const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;
const MAX_SUBSCRIPTION_URL_LEN: usize = 2048;
const MAX_LINK_LEN: usize = 4096;

/// User status as reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelUserStatus {
    Active,
    Disabled,
    Limited,
    Expired,
}

impl PanelUserStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(PanelUserStatus::Active),
            "DISABLED" => Some(PanelUserStatus::Disabled),
            "LIMITED" => Some(PanelUserStatus::Limited),
            "EXPIRED" => Some(PanelUserStatus::Expired),
            _ => None,
        }
    }
}

/// Subscription-relevant fields of a panel user object.
///
/// Webhook `data` and the panel's user API share this shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelUserFields {
    pub status: Option<PanelUserStatus>,
    pub expire_at: Option<Timestamp>,
    pub traffic_limit_bytes: Option<i64>,
    pub used_traffic_bytes: Option<i64>,
    pub subscription_url: Option<String>,
    pub crypto_link: Option<String>,
    pub short_uuid: Option<String>,
}

impl PanelUserFields {
    /// Extracts fields leniently; malformed values are treated as absent.
    pub fn from_json(data: &Value) -> Self {
        Self {
            status: data
                .get("status")
                .and_then(Value::as_str)
                .and_then(PanelUserStatus::parse),
            expire_at: data
                .get("expireAt")
                .and_then(Value::as_str)
                .and_then(Timestamp::parse_rfc3339),
            traffic_limit_bytes: integer(data.get("trafficLimitBytes")),
            used_traffic_bytes: integer(data.get("usedTrafficBytes"))
                .or_else(|| integer(data.get("userTraffic").and_then(|t| t.get("usedTrafficBytes")))),
            subscription_url: string(data.get("subscriptionUrl")),
            crypto_link: string(data.get("subscriptionCryptoLink")),
            short_uuid: string(data.get("shortUuid")),
        }
    }
}

fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string(value: Option<&Value>) -> Option<String> {
    value?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Whole gigabytes, rounded down.
pub fn bytes_to_gb(bytes: i64) -> i32 {
    i32::try_from(bytes.max(0) / BYTES_PER_GB).unwrap_or(i32::MAX)
}

/// Gigabytes with two decimals.
pub fn bytes_to_gb_2dp(bytes: i64) -> f64 {
    ((bytes.max(0) as f64 / BYTES_PER_GB as f64) * 100.0).round() / 100.0
}

/// `http(s)://` URL short enough to store.
pub fn is_subscription_url(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SUBSCRIPTION_URL_LEN
        && (value.starts_with("http://") || value.starts_with("https://"))
}

/// Any `scheme://` link (deep links included) short enough to store.
pub fn is_client_link(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_LINK_LEN {
        return false;
    }
    let Some((scheme, _)) = value.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Patch for a user-scoped webhook event.
///
/// Notice-only kinds return an empty patch.
pub fn plan_user_event(
    kind: UserEventKind,
    current: &Subscription,
    data: &Value,
    now: Timestamp,
) -> SubscriptionPatch {
    let mut patch = SubscriptionPatch::default();
    match kind {
        UserEventKind::Expired => patch.set_status(current, SubscriptionStatus::Expired),
        UserEventKind::Disabled => patch.set_status(current, SubscriptionStatus::Disabled),
        UserEventKind::Enabled => {
            if current.status == SubscriptionStatus::Disabled {
                patch.status = Some(SubscriptionStatus::Active);
            }
        }
        UserEventKind::Limited => {
            if current.status == SubscriptionStatus::Active {
                patch.status = Some(SubscriptionStatus::Disabled);
            }
        }
        UserEventKind::TrafficReset => {
            if current.traffic_used_gb != 0.0 {
                patch.traffic_used_gb = Some(0.0);
            }
            if current.status == SubscriptionStatus::Disabled {
                patch.status = Some(SubscriptionStatus::Active);
            }
        }
        UserEventKind::Modified => {
            patch = modified_patch(current, &PanelUserFields::from_json(data), now);
        }
        UserEventKind::Deleted => {
            patch.set_status(current, SubscriptionStatus::Expired);
            if current.subscription_url.is_some() {
                patch.subscription_url = Some(None);
            }
            if current.crypto_link.is_some() {
                patch.crypto_link = Some(None);
            }
            if current.short_uuid.is_some() {
                patch.short_uuid = Some(None);
            }
            if !current.connected_squads.is_empty() {
                patch.connected_squads = Some(Vec::new());
            }
            if current.panel_user_id.is_some() {
                patch.panel_user_id = Some(None);
            }
        }
        UserEventKind::Revoked => {
            let fields = PanelUserFields::from_json(data);
            if let Some(url) = fields.subscription_url.filter(|u| is_subscription_url(u)) {
                if current.subscription_url.as_deref() != Some(url.as_str()) {
                    patch.subscription_url = Some(Some(url));
                }
            }
            if let Some(link) = fields.crypto_link.filter(|l| is_client_link(l)) {
                if current.crypto_link.as_deref() != Some(link.as_str()) {
                    patch.crypto_link = Some(Some(link));
                }
            }
        }
        UserEventKind::Created
        | UserEventKind::ExpiresIn72Hours
        | UserEventKind::ExpiresIn48Hours
        | UserEventKind::ExpiresIn24Hours
        | UserEventKind::Expired24HoursAgo
        | UserEventKind::FirstConnected
        | UserEventKind::BandwidthThresholdReached
        | UserEventKind::NotConnected => {}
    }
    patch
}

/// `user.modified`: sync traffic, end date, status and URL.
fn modified_patch(current: &Subscription, fields: &PanelUserFields, now: Timestamp) -> SubscriptionPatch {
    let mut patch = traffic_and_date_patch(current, fields);
    let end_date = patch.end_date.unwrap_or(current.end_date);

    match fields.status {
        Some(PanelUserStatus::Active) if end_date.is_after(&now) => {
            if !current.status.grants_access() {
                patch.status = Some(SubscriptionStatus::Active);
            }
        }
        Some(PanelUserStatus::Disabled) => patch.set_status(current, SubscriptionStatus::Disabled),
        _ => {}
    }

    if let Some(url) = fields.subscription_url.as_ref().filter(|u| is_subscription_url(u)) {
        if current.subscription_url.as_ref() != Some(url) {
            patch.subscription_url = Some(Some(url.clone()));
        }
    }
    patch
}

/// Patch from a polled panel snapshot (periodic full sync).
///
/// Broader than `user.modified`: it maps every panel status and refreshes
/// the crypto link and short uuid as well.
pub fn snapshot_patch(current: &Subscription, fields: &PanelUserFields, now: Timestamp) -> SubscriptionPatch {
    let mut patch = traffic_and_date_patch(current, fields);
    let end_date = patch.end_date.unwrap_or(current.end_date);

    let target = match fields.status {
        Some(PanelUserStatus::Active) if end_date.is_after(&now) => {
            (!current.status.grants_access()).then_some(SubscriptionStatus::Active)
        }
        Some(PanelUserStatus::Active) | Some(PanelUserStatus::Expired) => Some(SubscriptionStatus::Expired),
        Some(PanelUserStatus::Disabled) | Some(PanelUserStatus::Limited) => Some(SubscriptionStatus::Disabled),
        None => None,
    };
    if let Some(status) = target {
        patch.set_status(current, status);
    }

    if let Some(url) = fields.subscription_url.as_ref().filter(|u| is_subscription_url(u)) {
        if current.subscription_url.as_ref() != Some(url) {
            patch.subscription_url = Some(Some(url.clone()));
        }
    }
    if let Some(link) = fields.crypto_link.as_ref().filter(|l| is_client_link(l)) {
        if current.crypto_link.as_ref() != Some(link) {
            patch.crypto_link = Some(Some(link.clone()));
        }
    }
    if let Some(short_uuid) = &fields.short_uuid {
        if current.short_uuid.as_ref() != Some(short_uuid) {
            patch.short_uuid = Some(Some(short_uuid.clone()));
        }
    }
    patch
}

fn traffic_and_date_patch(current: &Subscription, fields: &PanelUserFields) -> SubscriptionPatch {
    let mut patch = SubscriptionPatch::default();
    if let Some(bytes) = fields.traffic_limit_bytes {
        let limit = bytes_to_gb(bytes);
        if current.traffic_limit_gb != limit {
            patch.traffic_limit_gb = Some(limit);
        }
    }
    if let Some(bytes) = fields.used_traffic_bytes {
        let used = bytes_to_gb_2dp(bytes);
        if (current.traffic_used_gb - used).abs() > f64::EPSILON {
            patch.traffic_used_gb = Some(used);
        }
    }
    if let Some(expire_at) = fields.expire_at {
        if current.end_date != expire_at {
            patch.end_date = Some(expire_at);
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::aggregate::test_support::active_subscription;
    use serde_json::json;

    fn with_status(status: SubscriptionStatus) -> Subscription {
        let mut sub = active_subscription(Timestamp::now());
        sub.status = status;
        sub
    }

    // ══════════════════════════════════════════════════════════════
    // Status events
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn disabled_event_disables_active_subscription() {
        let sub = with_status(SubscriptionStatus::Active);
        let patch = plan_user_event(UserEventKind::Disabled, &sub, &json!({}), Timestamp::now());
        assert_eq!(patch.status, Some(SubscriptionStatus::Disabled));
    }

    #[test]
    fn repeated_disabled_event_is_a_no_op() {
        let sub = with_status(SubscriptionStatus::Disabled);
        let patch = plan_user_event(UserEventKind::Disabled, &sub, &json!({}), Timestamp::now());
        assert!(!patch.has_field_changes());
    }

    #[test]
    fn enabled_only_reactivates_disabled() {
        let disabled = with_status(SubscriptionStatus::Disabled);
        let expired = with_status(SubscriptionStatus::Expired);
        let now = Timestamp::now();

        assert_eq!(
            plan_user_event(UserEventKind::Enabled, &disabled, &json!({}), now).status,
            Some(SubscriptionStatus::Active)
        );
        assert!(plan_user_event(UserEventKind::Enabled, &expired, &json!({}), now)
            .status
            .is_none());
    }

    #[test]
    fn limited_only_disables_active() {
        let trial = with_status(SubscriptionStatus::Trial);
        let patch = plan_user_event(UserEventKind::Limited, &trial, &json!({}), Timestamp::now());
        assert!(patch.status.is_none());
    }

    #[test]
    fn traffic_reset_zeroes_usage_and_reenables() {
        let sub = with_status(SubscriptionStatus::Disabled);
        let patch = plan_user_event(UserEventKind::TrafficReset, &sub, &json!({}), Timestamp::now());
        assert_eq!(patch.traffic_used_gb, Some(0.0));
        assert_eq!(patch.status, Some(SubscriptionStatus::Active));
    }

    // ══════════════════════════════════════════════════════════════
    // user.modified
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn modified_writes_only_changed_fields() {
        let sub = active_subscription(Timestamp::now());
        let data = json!({
            "trafficLimitBytes": 100i64 * BYTES_PER_GB,
            "usedTrafficBytes": 20i64 * BYTES_PER_GB,
            "status": "ACTIVE",
            "subscriptionUrl": "https://panel.example/sub/abc",
        });

        let patch = plan_user_event(UserEventKind::Modified, &sub, &data, Timestamp::now());

        assert_eq!(patch.changed_fields(), vec!["traffic_used_gb"]);
        assert_eq!(patch.traffic_used_gb, Some(20.0));
    }

    #[test]
    fn modified_active_with_past_end_date_does_not_activate() {
        let sub = with_status(SubscriptionStatus::Expired);
        let data = json!({ "status": "ACTIVE", "expireAt": "2020-01-01T00:00:00Z" });

        let patch = plan_user_event(UserEventKind::Modified, &sub, &data, Timestamp::now());

        assert!(patch.status.is_none());
        assert!(patch.end_date.is_some());
    }

    #[test]
    fn modified_active_with_future_end_date_renews_expired() {
        let sub = with_status(SubscriptionStatus::Expired);
        let data = json!({ "status": "ACTIVE", "expireAt": "2099-01-01T00:00:00Z" });

        let patch = plan_user_event(UserEventKind::Modified, &sub, &data, Timestamp::now());

        assert_eq!(patch.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn modified_ignores_non_http_subscription_url() {
        let sub = active_subscription(Timestamp::now());
        let data = json!({ "subscriptionUrl": "javascript:alert(1)" });
        let patch = plan_user_event(UserEventKind::Modified, &sub, &data, Timestamp::now());
        assert!(patch.subscription_url.is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Deletion and credentials
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn deleted_expires_and_clears_linkage() {
        let sub = active_subscription(Timestamp::now());
        let patch = plan_user_event(UserEventKind::Deleted, &sub, &json!({}), Timestamp::now());

        assert_eq!(patch.status, Some(SubscriptionStatus::Expired));
        assert_eq!(patch.subscription_url, Some(None));
        assert_eq!(patch.short_uuid, Some(None));
        assert_eq!(patch.connected_squads, Some(Vec::new()));
        assert_eq!(patch.panel_user_id, Some(None));
    }

    #[test]
    fn revoked_accepts_deep_links_for_crypto_link() {
        let sub = active_subscription(Timestamp::now());
        let data = json!({
            "subscriptionUrl": "https://panel.example/sub/new",
            "subscriptionCryptoLink": "happ://crypt/xyz",
        });

        let patch = plan_user_event(UserEventKind::Revoked, &sub, &data, Timestamp::now());

        assert_eq!(patch.subscription_url, Some(Some("https://panel.example/sub/new".into())));
        assert_eq!(patch.crypto_link, Some(Some("happ://crypt/xyz".into())));
    }

    #[test]
    fn notice_only_events_produce_empty_patch() {
        let sub = active_subscription(Timestamp::now());
        let patch = plan_user_event(UserEventKind::FirstConnected, &sub, &json!({}), Timestamp::now());
        assert!(!patch.has_field_changes());
    }

    // ══════════════════════════════════════════════════════════════
    // Snapshot sync and helpers
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn snapshot_maps_limited_to_disabled() {
        let sub = active_subscription(Timestamp::now());
        let fields = PanelUserFields {
            status: Some(PanelUserStatus::Limited),
            ..Default::default()
        };
        let patch = snapshot_patch(&sub, &fields, Timestamp::now());
        assert_eq!(patch.status, Some(SubscriptionStatus::Disabled));
    }

    #[test]
    fn snapshot_active_reenables_disabled() {
        let sub = with_status(SubscriptionStatus::Disabled);
        let fields = PanelUserFields {
            status: Some(PanelUserStatus::Active),
            ..Default::default()
        };
        let patch = snapshot_patch(&sub, &fields, Timestamp::now());
        assert_eq!(patch.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn bytes_convert_to_gigabytes() {
        assert_eq!(bytes_to_gb(BYTES_PER_GB * 3 + 5), 3);
        assert_eq!(bytes_to_gb_2dp(BYTES_PER_GB + BYTES_PER_GB / 4), 1.25);
        assert_eq!(bytes_to_gb(-1), 0);
    }

    #[test]
    fn link_validation() {
        assert!(is_subscription_url("https://a.example/s"));
        assert!(!is_subscription_url("vless://x"));
        assert!(is_client_link("vless://x@host:443"));
        assert!(!is_client_link("1abc://x"));
        assert!(!is_client_link("no-scheme"));
    }

    #[test]
    fn fields_parse_numeric_strings() {
        let fields = PanelUserFields::from_json(&json!({ "trafficLimitBytes": "1073741824" }));
        assert_eq!(fields.traffic_limit_bytes, Some(BYTES_PER_GB));
    }
}

//! SyncPanelEventHandler - applies a verified panel webhook to local state.
//!
//! Signature checks happen at the HTTP edge. This handler dispatches on the
//! event variant, writes the minimal subscription diff together with the
//! receipt stamp, and fans out notices. Unknown events and unresolved users
//! are acknowledged with `processed = false`.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::domain::subscription::{
    bandwidth_percent, device_name, plan_user_event, user_lookups, AdminEvent, DeviceEventKind,
    NoticeCategory, PanelEnvelope, PanelEvent, Subscription, SubscriptionPatch, UserEventKind,
    UserLookup,
};
use crate::ports::{AdminNotice, Notifier, SubscriptionRepository, UserAccounts, UserNotice};

/// Which panel notices reach users.
#[derive(Debug, Clone)]
pub struct PanelNoticePolicy {
    pub enabled: bool,
    categories: HashMap<NoticeCategory, bool>,
}

impl Default for PanelNoticePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: HashMap::new(),
        }
    }
}

impl PanelNoticePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            categories: HashMap::new(),
        }
    }

    pub fn with_category(mut self, category: NoticeCategory, enabled: bool) -> Self {
        self.categories.insert(category, enabled);
        self
    }

    /// Categories default to on when the master switch is on.
    pub fn allows(&self, category: NoticeCategory) -> bool {
        self.enabled && self.categories.get(&category).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct SyncPanelEventCommand {
    pub envelope: PanelEnvelope,
    pub received_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPanelEventResult {
    pub processed: bool,
}

impl SyncPanelEventResult {
    fn processed(processed: bool) -> Self {
        Self { processed }
    }
}

pub struct SyncPanelEventHandler {
    users: Arc<dyn UserAccounts>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    notifier: Arc<dyn Notifier>,
    notices: PanelNoticePolicy,
}

impl SyncPanelEventHandler {
    pub fn new(
        users: Arc<dyn UserAccounts>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifier: Arc<dyn Notifier>,
        notices: PanelNoticePolicy,
    ) -> Self {
        Self {
            users,
            subscriptions,
            notifier,
            notices,
        }
    }

    /// Applies one envelope.
    ///
    /// # Errors
    ///
    /// Only store failures are returned, so the panel redelivers. Notice
    /// delivery failures are logged and swallowed.
    pub async fn handle(&self, cmd: SyncPanelEventCommand) -> Result<SyncPanelEventResult, DomainError> {
        let name = cmd.envelope.event.clone().unwrap_or_default();
        let data = &cmd.envelope.data;

        match PanelEvent::from_name(&name) {
            PanelEvent::Admin(event) => {
                self.notify_admin(&event, data).await;
                Ok(SyncPanelEventResult::processed(true))
            }
            PanelEvent::Unknown(name) => {
                warn!(event = %name, "Unhandled panel event acknowledged");
                Ok(SyncPanelEventResult::processed(false))
            }
            PanelEvent::User(kind) => self.handle_user(&name, kind, data, cmd.received_at).await,
            PanelEvent::Device(kind) => self.handle_device(&name, kind, data, cmd.received_at).await,
        }
    }

    async fn handle_user(
        &self,
        name: &str,
        kind: UserEventKind,
        data: &Value,
        received_at: Timestamp,
    ) -> Result<SyncPanelEventResult, DomainError> {
        let Some((user_id, subscription)) = self.resolve(data).await? else {
            info!(event = name, "Panel event for unknown user");
            return Ok(SyncPanelEventResult::processed(false));
        };

        let patch = plan_user_event(kind, &subscription, data, Timestamp::now());
        self.write(name, &subscription, &patch, received_at).await?;

        if let Some((category, key)) = kind.notice() {
            if self.notices.allows(category) {
                let mut notice = UserNotice::new(user_id, key)
                    .with_param("end_date", subscription.end_date.to_string());
                if kind == UserEventKind::BandwidthThresholdReached {
                    notice = notice.with_param("percent", bandwidth_percent(data));
                }
                self.notify_user(&notice).await;
            }
        }
        Ok(SyncPanelEventResult::processed(true))
    }

    async fn handle_device(
        &self,
        name: &str,
        kind: DeviceEventKind,
        data: &Value,
        received_at: Timestamp,
    ) -> Result<SyncPanelEventResult, DomainError> {
        let Some((user_id, subscription)) = self.resolve(data).await? else {
            info!(event = name, "Device event for unknown user");
            return Ok(SyncPanelEventResult::processed(false));
        };

        self.write(name, &subscription, &SubscriptionPatch::default(), received_at)
            .await?;

        if self.notices.allows(NoticeCategory::Devices) {
            let notice =
                UserNotice::new(user_id, kind.notice_key()).with_param("device", device_name(data));
            self.notify_user(&notice).await;
        }
        Ok(SyncPanelEventResult::processed(true))
    }

    /// Writes the patch and the receipt stamp. An empty patch still stamps.
    async fn write(
        &self,
        name: &str,
        subscription: &Subscription,
        patch: &SubscriptionPatch,
        received_at: Timestamp,
    ) -> Result<(), DomainError> {
        self.subscriptions
            .apply_webhook_patch(subscription.id, patch, received_at)
            .await?;
        if patch.has_field_changes() {
            info!(
                event = name,
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                from = subscription.status.as_str(),
                to = patch.status.unwrap_or(subscription.status).as_str(),
                fields = ?patch.changed_fields(),
                "Subscription updated from panel"
            );
        } else {
            debug!(event = name, subscription_id = %subscription.id, "Panel event stamped without changes");
        }
        Ok(())
    }

    /// Finds the local user and subscription, trying each reference in order.
    async fn resolve(&self, data: &Value) -> Result<Option<(UserId, Subscription)>, DomainError> {
        for lookup in user_lookups(data) {
            let subscription = match lookup {
                UserLookup::TelegramId(telegram_id) => {
                    match self.users.find_by_telegram_id(telegram_id).await? {
                        Some(user) => self.subscriptions.find_by_user(user.id).await?,
                        None => None,
                    }
                }
                UserLookup::PanelUser(panel_user_id) => {
                    self.subscriptions.find_by_panel_user(panel_user_id).await?
                }
            };
            if let Some(subscription) = subscription {
                return Ok(Some((subscription.user_id, subscription)));
            }
        }
        Ok(None)
    }

    async fn notify_user(&self, notice: &UserNotice) {
        if let Err(err) = self.notifier.notify_user(notice).await {
            warn!(user_id = %notice.user_id, kind = %notice.kind, error = %err, "Panel notice not delivered");
        }
    }

    async fn notify_admin(&self, event: &AdminEvent, data: &Value) {
        let mut notice = AdminNotice::new(event.name.clone(), event.title);
        if let Some(fields) = data.as_object() {
            for (key, value) in fields {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                notice = notice.with_field(key.clone(), text);
            }
        }
        if let Err(err) = self.notifier.notify_admin(&notice).await {
            warn!(event = %event.name, error = %err, "Operator notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryPaymentStore, InMemorySubscriptionRepository, RecordingNotifier};
    use crate::domain::subscription::test_support::active_subscription;
    use crate::domain::subscription::SubscriptionStatus;
    use crate::ports::UserAccount;
    use serde_json::json;

    struct Fixture {
        subscriptions: Arc<InMemorySubscriptionRepository>,
        notifier: Arc<RecordingNotifier>,
        handler: SyncPanelEventHandler,
        subscription: Subscription,
    }

    fn fixture(policy: PanelNoticePolicy) -> Fixture {
        let users = Arc::new(InMemoryPaymentStore::new());
        users.add_user(UserAccount {
            id: UserId::new(10),
            telegram_id: Some(5_550_001),
            email: None,
            language: "ru".into(),
            balance_minor: 0,
            has_made_first_topup: false,
            referred_by: None,
            promo_tier: None,
        });
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let subscription = active_subscription(Timestamp::now());
        subscriptions.insert(subscription.clone());
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = SyncPanelEventHandler::new(users, subscriptions.clone(), notifier.clone(), policy);
        Fixture {
            subscriptions,
            notifier,
            handler,
            subscription,
        }
    }

    fn command(event: &str, data: Value) -> SyncPanelEventCommand {
        SyncPanelEventCommand {
            envelope: PanelEnvelope {
                scope: Some(event.split('.').next().unwrap_or_default().to_string()),
                event: Some(event.to_string()),
                timestamp: None,
                data,
            },
            received_at: Timestamp::now(),
        }
    }

    // ══════════════════════════════════════════════════════════════
    // User events
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn disabled_event_transitions_and_stamps() {
        let f = fixture(PanelNoticePolicy::default());
        let cmd = command("user.disabled", json!({ "telegramId": 5_550_001 }));
        let received_at = cmd.received_at;

        let result = f.handler.handle(cmd).await.unwrap();

        assert!(result.processed);
        let stored = f.subscriptions.get(f.subscription.id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Disabled);
        assert_eq!(stored.last_external_update_at, Some(received_at));
        assert_eq!(f.notifier.user_notices()[0].kind, "subscription_disabled");
    }

    #[tokio::test]
    async fn user_resolved_by_panel_uuid() {
        let f = fixture(PanelNoticePolicy::default());
        let uuid = f.subscription.panel_user_id.unwrap().to_string();

        let result = f
            .handler
            .handle(command("user.expired", json!({ "uuid": uuid })))
            .await
            .unwrap();

        assert!(result.processed);
        assert_eq!(
            f.subscriptions.get(f.subscription.id).unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn deleted_event_keeps_row_and_clears_linkage() {
        let f = fixture(PanelNoticePolicy::default());

        f.handler
            .handle(command("user.deleted", json!({ "telegramId": "5550001" })))
            .await
            .unwrap();

        let stored = f.subscriptions.get(f.subscription.id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Expired);
        assert!(stored.panel_user_id.is_none());
        assert!(stored.subscription_url.is_none());
        assert!(stored.connected_squads.is_empty());
    }

    #[tokio::test]
    async fn modified_event_does_not_notify() {
        let f = fixture(PanelNoticePolicy::default());

        f.handler
            .handle(command(
                "user.modified",
                json!({ "telegramId": 5_550_001, "usedTrafficBytes": 0 }),
            ))
            .await
            .unwrap();

        assert!(f.notifier.user_notices().is_empty());
        assert_eq!(f.subscriptions.get(f.subscription.id).unwrap().traffic_used_gb, 0.0);
    }

    #[tokio::test]
    async fn unresolved_user_is_not_processed() {
        let f = fixture(PanelNoticePolicy::default());

        let result = f
            .handler
            .handle(command("user.disabled", json!({ "telegramId": 42 })))
            .await
            .unwrap();

        assert!(!result.processed);
        assert_eq!(
            f.subscriptions.get(f.subscription.id).unwrap().status,
            SubscriptionStatus::Active
        );
    }

    // ══════════════════════════════════════════════════════════════
    // Notices
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn category_toggle_suppresses_notice_but_not_transition() {
        let policy = PanelNoticePolicy::default().with_category(NoticeCategory::Disabled, false);
        let f = fixture(policy);

        f.handler
            .handle(command("user.disabled", json!({ "telegramId": 5_550_001 })))
            .await
            .unwrap();

        assert!(f.notifier.user_notices().is_empty());
        assert_eq!(
            f.subscriptions.get(f.subscription.id).unwrap().status,
            SubscriptionStatus::Disabled
        );
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_the_event() {
        let f = fixture(PanelNoticePolicy::default());
        f.notifier.fail_next(1);

        let result = f
            .handler
            .handle(command("user.expires_in_24_hours", json!({ "telegramId": 5_550_001 })))
            .await
            .unwrap();

        assert!(result.processed);
    }

    #[tokio::test]
    async fn bandwidth_notice_carries_percent() {
        let f = fixture(PanelNoticePolicy::default());

        f.handler
            .handle(command(
                "user.bandwidth_usage_threshold_reached",
                json!({ "telegramId": 5_550_001, "thresholdPercent": "90%" }),
            ))
            .await
            .unwrap();

        let notice = &f.notifier.user_notices()[0];
        assert_eq!(notice.params.get("percent").map(String::as_str), Some("90"));
    }

    #[tokio::test]
    async fn device_event_notifies_with_device_name() {
        let f = fixture(PanelNoticePolicy::default());

        f.handler
            .handle(command(
                "user_hwid_devices.added",
                json!({
                    "user": { "telegramId": 5_550_001 },
                    "hwidUserDevice": { "hwid": "abcdef123456", "platform": "iOS", "tag": "iPhone" }
                }),
            ))
            .await
            .unwrap();

        let notice = &f.notifier.user_notices()[0];
        assert_eq!(notice.kind, "device_added");
        assert!(notice.params["device"].contains("iPhone"));
    }

    // ══════════════════════════════════════════════════════════════
    // Other scopes
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn admin_event_notifies_operators_only() {
        let f = fixture(PanelNoticePolicy::default());

        let result = f
            .handler
            .handle(command("node.connection_lost", json!({ "name": "de-1", "port": 443 })))
            .await
            .unwrap();

        assert!(result.processed);
        let admin = f.notifier.admin_notices();
        assert_eq!(admin[0].title, "Node connection lost");
        assert_eq!(admin[0].fields["port"], "443");
        assert!(f.notifier.user_notices().is_empty());
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged() {
        let f = fixture(PanelNoticePolicy::default());

        let result = f
            .handler
            .handle(command("torrent.blocked", json!({})))
            .await
            .unwrap();

        assert!(!result.processed);
    }
}

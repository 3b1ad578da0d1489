//! Subscription aggregate and minimal-diff patches.
//!
//! Writers never replace a whole row. They compute a [`SubscriptionPatch`]
//! holding only the fields that differ, and the store applies it together
//! with the monotonic `last_external_update_at` stamp.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PanelUserId, SubscriptionId, Timestamp, UserId};

use super::SubscriptionStatus;

/// Provisioning state of one user's access subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub end_date: Timestamp,
    pub traffic_limit_gb: i32,
    pub traffic_used_gb: f64,
    pub subscription_url: Option<String>,
    pub crypto_link: Option<String>,
    pub short_uuid: Option<String>,
    pub connected_squads: Vec<String>,
    pub panel_user_id: Option<PanelUserId>,
    /// Receipt time of the freshest panel webhook applied to this row.
    pub last_external_update_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Applies a patch in place. Used by in-memory stores; the Postgres
    /// store issues the equivalent conditional UPDATE.
    pub fn apply(&mut self, patch: &SubscriptionPatch, now: Timestamp) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(limit) = patch.traffic_limit_gb {
            self.traffic_limit_gb = limit;
        }
        if let Some(used) = patch.traffic_used_gb {
            self.traffic_used_gb = used;
        }
        if let Some(url) = &patch.subscription_url {
            self.subscription_url = url.clone();
        }
        if let Some(link) = &patch.crypto_link {
            self.crypto_link = link.clone();
        }
        if let Some(short_uuid) = &patch.short_uuid {
            self.short_uuid = short_uuid.clone();
        }
        if let Some(squads) = &patch.connected_squads {
            self.connected_squads = squads.clone();
        }
        if let Some(panel_user_id) = patch.panel_user_id {
            self.panel_user_id = panel_user_id;
        }
        if patch.has_field_changes() {
            self.updated_at = now;
        }
    }

    /// Stamps the receipt time, never moving the stamp backwards.
    pub fn stamp_external_update(&mut self, received_at: Timestamp) {
        self.last_external_update_at = Some(match self.last_external_update_at {
            Some(existing) => existing.max(received_at),
            None => received_at,
        });
    }

    /// True if a snapshot taken at `taken_at` may overwrite this row at `now`.
    ///
    /// The snapshot loses if a webhook stamp is newer than the snapshot
    /// itself or landed within the guard window.
    pub fn accepts_snapshot(&self, taken_at: Timestamp, now: Timestamp, guard_secs: i64) -> bool {
        match self.last_external_update_at {
            None => true,
            Some(stamp) => stamp.is_before(&snapshot_cutoff(taken_at, now, guard_secs)),
        }
    }
}

/// Latest stamp a snapshot can still override.
pub fn snapshot_cutoff(taken_at: Timestamp, now: Timestamp, guard_secs: i64) -> Timestamp {
    let guarded = now.minus_secs(guard_secs);
    if taken_at.is_before(&guarded) {
        taken_at
    } else {
        guarded
    }
}

/// Fields to change on a subscription. `None` means untouched.
///
/// Nullable columns use `Option<Option<_>>` so a patch can clear them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub status: Option<SubscriptionStatus>,
    pub end_date: Option<Timestamp>,
    pub traffic_limit_gb: Option<i32>,
    pub traffic_used_gb: Option<f64>,
    pub subscription_url: Option<Option<String>>,
    pub crypto_link: Option<Option<String>>,
    pub short_uuid: Option<Option<String>>,
    pub connected_squads: Option<Vec<String>>,
    pub panel_user_id: Option<Option<PanelUserId>>,
}

impl SubscriptionPatch {
    /// True if any column other than the stamp would change.
    pub fn has_field_changes(&self) -> bool {
        self.status.is_some()
            || self.end_date.is_some()
            || self.traffic_limit_gb.is_some()
            || self.traffic_used_gb.is_some()
            || self.subscription_url.is_some()
            || self.crypto_link.is_some()
            || self.short_uuid.is_some()
            || self.connected_squads.is_some()
            || self.panel_user_id.is_some()
    }

    /// Sets the status only if it differs from the current one.
    pub fn set_status(&mut self, current: &Subscription, status: SubscriptionStatus) {
        if current.status != status {
            self.status = Some(status);
        }
    }

    /// Names of the changed columns, for logging.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.end_date.is_some() {
            fields.push("end_date");
        }
        if self.traffic_limit_gb.is_some() {
            fields.push("traffic_limit_gb");
        }
        if self.traffic_used_gb.is_some() {
            fields.push("traffic_used_gb");
        }
        if self.subscription_url.is_some() {
            fields.push("subscription_url");
        }
        if self.crypto_link.is_some() {
            fields.push("crypto_link");
        }
        if self.short_uuid.is_some() {
            fields.push("short_uuid");
        }
        if self.connected_squads.is_some() {
            fields.push("connected_squads");
        }
        if self.panel_user_id.is_some() {
            fields.push("panel_user_id");
        }
        fields
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::active_subscription;
    use super::*;

    #[test]
    fn stamp_never_moves_backwards() {
        let now = Timestamp::now();
        let mut sub = active_subscription(now);

        sub.stamp_external_update(now);
        sub.stamp_external_update(now.minus_secs(30));

        assert_eq!(sub.last_external_update_at, Some(now));
    }

    #[test]
    fn snapshot_accepted_when_never_stamped() {
        let now = Timestamp::now();
        let sub = active_subscription(now);
        assert!(sub.accepts_snapshot(now.minus_secs(5), now, 60));
    }

    #[test]
    fn snapshot_older_than_stamp_is_refused() {
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        sub.stamp_external_update(now.minus_secs(600));

        assert!(!sub.accepts_snapshot(now.minus_secs(700), now, 60));
    }

    #[test]
    fn snapshot_refused_inside_guard_window() {
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        sub.stamp_external_update(now.minus_secs(10));

        assert!(!sub.accepts_snapshot(now, now, 60));
    }

    #[test]
    fn snapshot_accepted_after_guard_window() {
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        sub.stamp_external_update(now.minus_secs(120));

        assert!(sub.accepts_snapshot(now, now, 60));
    }

    #[test]
    fn apply_can_clear_nullable_columns() {
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        let patch = SubscriptionPatch {
            subscription_url: Some(None),
            panel_user_id: Some(None),
            ..Default::default()
        };

        sub.apply(&patch, now);

        assert!(sub.subscription_url.is_none());
        assert!(sub.panel_user_id.is_none());
    }

    #[test]
    fn set_status_skips_unchanged_status() {
        let now = Timestamp::now();
        let sub = active_subscription(now);
        let mut patch = SubscriptionPatch::default();

        patch.set_status(&sub, SubscriptionStatus::Active);
        assert!(!patch.has_field_changes());

        patch.set_status(&sub, SubscriptionStatus::Disabled);
        assert_eq!(patch.changed_fields(), vec!["status"]);
    }
}

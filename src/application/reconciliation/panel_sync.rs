//! PanelSync - periodic full sync of subscriptions from the panel.
//!
//! Pages through linked subscriptions, fetches each panel user and writes the
//! snapshot diff through the store's conditional snapshot write. A row that a
//! webhook stamped after the snapshot was taken, or within the guard window,
//! is left alone.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::subscription::{snapshot_patch, Subscription};
use crate::ports::{ProvisioningPanel, SubscriptionRepository};

/// Default window during which a webhook stamp beats any snapshot.
pub const DEFAULT_SYNC_GUARD_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PanelSyncConfig {
    pub interval: Duration,
    pub page_size: i64,
    pub guard_secs: i64,
}

impl Default for PanelSyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            page_size: 200,
            guard_secs: DEFAULT_SYNC_GUARD_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelSyncReport {
    pub scanned: usize,
    pub written: usize,
    pub unchanged: usize,
    /// Refused because a webhook stamp was fresher.
    pub guarded: usize,
    pub missing: usize,
    pub failed: usize,
}

pub struct PanelSync {
    subscriptions: Arc<dyn SubscriptionRepository>,
    panel: Arc<dyn ProvisioningPanel>,
    config: PanelSyncConfig,
}

impl PanelSync {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        panel: Arc<dyn ProvisioningPanel>,
        config: PanelSyncConfig,
    ) -> Self {
        Self {
            subscriptions,
            panel,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Panel sync stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    match self.sync_once().await {
                        Ok(report) => info!(
                            scanned = report.scanned,
                            written = report.written,
                            guarded = report.guarded,
                            failed = report.failed,
                            "Panel sync finished"
                        ),
                        Err(err) => error!(error = %err, "Panel sync failed"),
                    }
                }
            }
        }
    }

    /// Runs one full pass over linked subscriptions.
    pub async fn sync_once(&self) -> Result<PanelSyncReport, DomainError> {
        let mut report = PanelSyncReport::default();
        let mut cursor = None;

        loop {
            let page = self
                .subscriptions
                .list_linked(cursor, self.config.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            let full_page = i64::try_from(page.len()).unwrap_or(i64::MAX) >= self.config.page_size;

            for subscription in &page {
                report.scanned += 1;
                self.sync_one(subscription, &mut report).await?;
            }

            if !full_page {
                break;
            }
        }

        Ok(report)
    }

    async fn sync_one(
        &self,
        subscription: &Subscription,
        report: &mut PanelSyncReport,
    ) -> Result<(), DomainError> {
        let Some(panel_user_id) = subscription.panel_user_id else {
            return Ok(());
        };

        let snapshot = match self.panel.fetch_user(panel_user_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!(subscription_id = %subscription.id, panel_user_id = %panel_user_id, "Linked panel user not found");
                report.missing += 1;
                return Ok(());
            }
            Err(err) => {
                warn!(subscription_id = %subscription.id, error = %err, "Panel fetch failed");
                report.failed += 1;
                return Ok(());
            }
        };

        let now = Timestamp::now();
        let patch = snapshot_patch(subscription, &snapshot.fields, now);
        if !patch.has_field_changes() {
            report.unchanged += 1;
            return Ok(());
        }
        if !subscription.accepts_snapshot(snapshot.taken_at, now, self.config.guard_secs) {
            debug!(subscription_id = %subscription.id, "Snapshot older than webhook stamp, skipped");
            report.guarded += 1;
            return Ok(());
        }

        let written = self
            .subscriptions
            .apply_snapshot_patch(
                subscription.id,
                &patch,
                snapshot.taken_at,
                now,
                self.config.guard_secs,
            )
            .await?;
        if written {
            info!(
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                fields = ?patch.changed_fields(),
                "Subscription refreshed from panel snapshot"
            );
            report.written += 1;
        } else {
            report.guarded += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemorySubscriptionRepository, StaticPanel};
    use crate::domain::subscription::test_support::active_subscription;
    use crate::domain::subscription::{PanelUserFields, PanelUserStatus, SubscriptionStatus};
    use crate::ports::{PanelError, PanelUserSnapshot};

    fn disabled_fields() -> PanelUserFields {
        PanelUserFields {
            status: Some(PanelUserStatus::Disabled),
            ..PanelUserFields::default()
        }
    }

    fn setup() -> (Arc<InMemorySubscriptionRepository>, Arc<StaticPanel>, PanelSync) {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let panel = Arc::new(StaticPanel::new());
        let sync = PanelSync::new(repo.clone(), panel.clone(), PanelSyncConfig::default());
        (repo, panel, sync)
    }

    #[tokio::test]
    async fn snapshot_applies_to_unstamped_row() {
        let (repo, panel, sync) = setup();
        let sub = active_subscription(Timestamp::now());
        repo.insert(sub.clone());
        panel.set_user(PanelUserSnapshot {
            panel_user_id: sub.panel_user_id.unwrap(),
            fields: disabled_fields(),
            taken_at: Timestamp::now(),
        });

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(repo.get(sub.id).unwrap().status, SubscriptionStatus::Disabled);
    }

    #[tokio::test]
    async fn fresher_webhook_stamp_wins_over_snapshot() {
        let (repo, panel, sync) = setup();
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        sub.status = SubscriptionStatus::Disabled;
        sub.stamp_external_update(now.minus_secs(10));
        repo.insert(sub.clone());
        panel.set_user(PanelUserSnapshot {
            panel_user_id: sub.panel_user_id.unwrap(),
            fields: PanelUserFields {
                status: Some(PanelUserStatus::Active),
                ..PanelUserFields::default()
            },
            taken_at: now.minus_secs(30),
        });

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.guarded, 1);
        assert_eq!(repo.get(sub.id).unwrap().status, SubscriptionStatus::Disabled);
    }

    #[tokio::test]
    async fn panel_failures_do_not_abort_the_pass() {
        let (repo, panel, sync) = setup();
        let failing = active_subscription(Timestamp::now());
        let healthy = active_subscription(Timestamp::now());
        repo.insert(failing.clone());
        repo.insert(healthy.clone());
        panel.fail_user(failing.panel_user_id.unwrap(), PanelError::Transient("timeout".into()));
        panel.set_user(PanelUserSnapshot {
            panel_user_id: healthy.panel_user_id.unwrap(),
            fields: disabled_fields(),
            taken_at: Timestamp::now(),
        });

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 1);
    }

    #[tokio::test]
    async fn pages_through_all_linked_rows() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let panel = Arc::new(StaticPanel::new());
        for _ in 0..5 {
            repo.insert(active_subscription(Timestamp::now()));
        }
        let config = PanelSyncConfig {
            page_size: 2,
            ..PanelSyncConfig::default()
        };
        let sync = PanelSync::new(repo, panel, config);

        let report = sync.sync_once().await.unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.missing, 5);
    }
}

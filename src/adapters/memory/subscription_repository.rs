//! In-memory subscription repository.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::foundation::{
    DomainError, ErrorCode, PanelUserId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::{Subscription, SubscriptionPatch};
use crate::ports::SubscriptionRepository;

/// Subscriptions keyed by id, ordered so `list_linked` pages stably.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<BTreeMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SubscriptionId, Subscription>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SubscriptionId, Subscription>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(id: SubscriptionId) -> DomainError {
        DomainError::new(
            ErrorCode::SubscriptionNotFound,
            format!("Subscription {} not found", id),
        )
    }

    // === Test Helpers ===

    pub fn insert(&self, subscription: Subscription) {
        self.write().insert(subscription.id, subscription);
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.read().get(&id).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.read().values().find(|s| s.user_id == user_id).cloned())
    }

    async fn find_by_panel_user(
        &self,
        panel_user_id: PanelUserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .read()
            .values()
            .find(|s| s.panel_user_id == Some(panel_user_id))
            .cloned())
    }

    async fn apply_webhook_patch(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        received_at: Timestamp,
    ) -> Result<(), DomainError> {
        let mut rows = self.write();
        let row = rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        row.apply(patch, Timestamp::now());
        row.stamp_external_update(received_at);
        Ok(())
    }

    async fn apply_snapshot_patch(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        taken_at: Timestamp,
        now: Timestamp,
        guard_secs: i64,
    ) -> Result<bool, DomainError> {
        let mut rows = self.write();
        let row = rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        if !row.accepts_snapshot(taken_at, now, guard_secs) {
            return Ok(false);
        }
        row.apply(patch, now);
        Ok(true)
    }

    async fn list_linked(
        &self,
        after: Option<SubscriptionId>,
        limit: i64,
    ) -> Result<Vec<Subscription>, DomainError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(self
            .read()
            .values()
            .filter(|s| s.panel_user_id.is_some())
            .filter(|s| after.map_or(true, |cursor| s.id > cursor))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::test_support::active_subscription;
    use crate::domain::subscription::SubscriptionStatus;

    #[tokio::test]
    async fn webhook_patch_stamps_even_without_changes() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        let sub = active_subscription(now);
        repo.insert(sub.clone());

        repo.apply_webhook_patch(sub.id, &SubscriptionPatch::default(), now)
            .await
            .unwrap();

        assert_eq!(repo.get(sub.id).unwrap().last_external_update_at, Some(now));
    }

    #[tokio::test]
    async fn snapshot_patch_loses_to_recent_webhook() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        let mut sub = active_subscription(now);
        sub.stamp_external_update(now.minus_secs(5));
        repo.insert(sub.clone());
        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::Disabled),
            ..Default::default()
        };

        let written = repo
            .apply_snapshot_patch(sub.id, &patch, now.minus_secs(30), now, 60)
            .await
            .unwrap();

        assert!(!written);
        assert_eq!(repo.get(sub.id).unwrap().status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn snapshot_patch_never_stamps() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        let sub = active_subscription(now);
        repo.insert(sub.clone());
        let patch = SubscriptionPatch {
            traffic_used_gb: Some(50.0),
            ..Default::default()
        };

        assert!(repo
            .apply_snapshot_patch(sub.id, &patch, now, now, 60)
            .await
            .unwrap());
        let stored = repo.get(sub.id).unwrap();
        assert_eq!(stored.traffic_used_gb, 50.0);
        assert!(stored.last_external_update_at.is_none());
    }

    #[tokio::test]
    async fn list_linked_pages_after_cursor() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        for _ in 0..3 {
            repo.insert(active_subscription(now));
        }
        let mut unlinked = active_subscription(now);
        unlinked.panel_user_id = None;
        repo.insert(unlinked);

        let first = repo.list_linked(None, 2).await.unwrap();
        let rest = repo.list_linked(Some(first[1].id), 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(rest[0].id > first[1].id);
    }
}

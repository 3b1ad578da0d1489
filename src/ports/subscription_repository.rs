//! SubscriptionRepository port.
//!
//! Two writers share the subscriptions table: the webhook synchronizer and
//! the periodic panel sync. They use different write methods so the store
//! can enforce the monotonic stamp rule for each.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, PanelUserId, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{Subscription, SubscriptionPatch};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<Subscription>, DomainError>;

    async fn find_by_panel_user(&self, panel_user_id: PanelUserId) -> Result<Option<Subscription>, DomainError>;

    /// Webhook write: applies the patch and sets
    /// `last_external_update_at = max(existing, received_at)` unconditionally.
    async fn apply_webhook_patch(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        received_at: Timestamp,
    ) -> Result<(), DomainError>;

    /// Periodic-sync write: applies the patch only if the row's stamp is null
    /// or older than `min(taken_at, now - guard_secs)`. Never touches the stamp.
    ///
    /// Returns true if the row was written.
    async fn apply_snapshot_patch(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        taken_at: Timestamp,
        now: Timestamp,
        guard_secs: i64,
    ) -> Result<bool, DomainError>;

    /// Subscriptions with a panel linkage, ordered by id, after the cursor.
    async fn list_linked(
        &self,
        after: Option<SubscriptionId>,
        limit: i64,
    ) -> Result<Vec<Subscription>, DomainError>;
}

//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Patches become UPDATE statements that list only the changed columns.
//! Webhook writes always move the stamp forward with `GREATEST`; snapshot
//! writes are filtered on the stamp and never set it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, PanelUserId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::{snapshot_cutoff, Subscription, SubscriptionPatch, SubscriptionStatus};
use crate::ports::SubscriptionRepository;

#[derive(Clone)]
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, status, end_date, traffic_limit_gb, traffic_used_gb, \
     subscription_url, crypto_link, short_uuid, connected_squads, panel_user_id, \
     last_external_update_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: i64,
    status: String,
    end_date: DateTime<Utc>,
    traffic_limit_gb: i32,
    traffic_used_gb: f64,
    subscription_url: Option<String>,
    crypto_link: Option<String>,
    short_uuid: Option<String>,
    connected_squads: Vec<String>,
    panel_user_id: Option<Uuid>,
    last_external_update_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<SubscriptionStatus>().map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid status in subscription {}: {}", row.id, e),
            )
        })?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            status,
            end_date: Timestamp::from_datetime(row.end_date),
            traffic_limit_gb: row.traffic_limit_gb,
            traffic_used_gb: row.traffic_used_gb,
            subscription_url: row.subscription_url,
            crypto_link: row.crypto_link,
            short_uuid: row.short_uuid,
            connected_squads: row.connected_squads,
            panel_user_id: row.panel_user_id.map(PanelUserId::from_uuid),
            last_external_update_at: row.last_external_update_at.map(Timestamp::from_datetime),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Pushes `col = $n` pairs for every changed field, ending with `updated_at`.
///
/// Returns false if the patch changes nothing, in which case nothing was pushed.
fn push_patch_columns(builder: &mut QueryBuilder<'_, Postgres>, patch: &SubscriptionPatch, now: Timestamp) -> bool {
    if !patch.has_field_changes() {
        return false;
    }

    let mut set = builder.separated(", ");
    if let Some(status) = patch.status {
        set.push("status = ").push_bind_unseparated(status.as_str());
    }
    if let Some(end_date) = patch.end_date {
        set.push("end_date = ").push_bind_unseparated(*end_date.as_datetime());
    }
    if let Some(limit) = patch.traffic_limit_gb {
        set.push("traffic_limit_gb = ").push_bind_unseparated(limit);
    }
    if let Some(used) = patch.traffic_used_gb {
        set.push("traffic_used_gb = ").push_bind_unseparated(used);
    }
    if let Some(url) = &patch.subscription_url {
        set.push("subscription_url = ").push_bind_unseparated(url.clone());
    }
    if let Some(link) = &patch.crypto_link {
        set.push("crypto_link = ").push_bind_unseparated(link.clone());
    }
    if let Some(short_uuid) = &patch.short_uuid {
        set.push("short_uuid = ").push_bind_unseparated(short_uuid.clone());
    }
    if let Some(squads) = &patch.connected_squads {
        set.push("connected_squads = ").push_bind_unseparated(squads.clone());
    }
    if let Some(panel_user_id) = patch.panel_user_id {
        set.push("panel_user_id = ")
            .push_bind_unseparated(panel_user_id.map(|id| *id.as_uuid()));
    }
    set.push("updated_at = ").push_bind_unseparated(*now.as_datetime());
    true
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_panel_user(&self, panel_user_id: PanelUserId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE panel_user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(panel_user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch subscription by panel user", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn apply_webhook_patch(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        received_at: Timestamp,
    ) -> Result<(), DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE subscriptions SET ");
        if push_patch_columns(&mut builder, patch, Timestamp::now()) {
            builder.push(", ");
        }
        builder
            .push("last_external_update_at = GREATEST(COALESCE(last_external_update_at, ")
            .push_bind(*received_at.as_datetime())
            .push("), ")
            .push_bind(*received_at.as_datetime())
            .push(") WHERE id = ")
            .push_bind(*id.as_uuid());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database("Failed to apply webhook patch", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", id),
            ));
        }
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
        let cutoff = *snapshot_cutoff(taken_at, now, guard_secs).as_datetime();

        if !patch.has_field_changes() {
            let (accepts,): (bool,) = sqlx::query_as(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM subscriptions
                    WHERE id = $1
                      AND (last_external_update_at IS NULL OR last_external_update_at < $2)
                )
                "#,
            )
            .bind(id.as_uuid())
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::database("Failed to check snapshot guard", e))?;
            return Ok(accepts);
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE subscriptions SET ");
        push_patch_columns(&mut builder, patch, now);
        builder
            .push(" WHERE id = ")
            .push_bind(*id.as_uuid())
            .push(" AND (last_external_update_at IS NULL OR last_external_update_at < ")
            .push_bind(cutoff)
            .push(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database("Failed to apply snapshot patch", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_linked(
        &self,
        after: Option<SubscriptionId>,
        limit: i64,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE panel_user_id IS NOT NULL
              AND ($1::UUID IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(after.map(|id| *id.as_uuid()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to list linked subscriptions", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }
}

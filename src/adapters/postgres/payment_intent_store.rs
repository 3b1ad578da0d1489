//! PostgreSQL implementation of PaymentIntentStore.
//!
//! The settlement guard is the conditional UPDATE in [`commit_settlement`]:
//! whichever transaction flips `ledger_transaction_id` from NULL wins, and
//! only that transaction inserts the ledger row.
//!
//! [`commit_settlement`]: PostgresPaymentIntentStore::commit_settlement

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, OrderId, Timestamp, TransactionId, UserId};
use crate::domain::settlement::{IntentMetadata, IntentStatus, LedgerTransaction, PaymentIntent};
use crate::ports::{CommitResult, PaymentIntentStore};

use super::ledger_repository::insert_ledger_row;

/// PostgreSQL implementation of the PaymentIntentStore port.
#[derive(Clone)]
pub struct PostgresPaymentIntentStore {
    pool: PgPool,
}

impl PostgresPaymentIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INTENT_COLUMNS: &str = "order_id, processor, user_id, amount_minor, currency, status, \
     external_ref, checkout_url, ledger_transaction_id, expires_at, metadata, \
     created_at, updated_at, settled_at";

/// Database row representation of a payment intent.
#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    order_id: String,
    processor: String,
    user_id: i64,
    amount_minor: i64,
    currency: String,
    status: String,
    external_ref: Option<String>,
    checkout_url: Option<String>,
    ledger_transaction_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
    metadata: Json<IntentMetadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = DomainError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid {} in payment_intents row {}: {}", field, row.order_id, e),
            )
        };

        Ok(PaymentIntent {
            order_id: OrderId::new(row.order_id.clone()).map_err(|e| corrupt("order_id", &e))?,
            processor: row.processor.parse().map_err(|e| corrupt("processor", &e))?,
            user_id: UserId::new(row.user_id),
            amount_minor: row.amount_minor,
            currency: row.currency.parse().map_err(|e| corrupt("currency", &e))?,
            status: row.status.parse().map_err(|e| corrupt("status", &e))?,
            external_ref: row.external_ref,
            checkout_url: row.checkout_url,
            ledger_transaction_id: row.ledger_transaction_id.map(TransactionId::from_uuid),
            expires_at: Timestamp::from_datetime(row.expires_at),
            metadata: row.metadata.0,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            settled_at: row.settled_at.map(Timestamp::from_datetime),
        })
    }
}

/// State of an intent row as seen after a guarded update missed.
#[derive(Debug, sqlx::FromRow)]
struct GuardRow {
    status: String,
    ledger_transaction_id: Option<Uuid>,
}

#[async_trait]
impl PaymentIntentStore for PostgresPaymentIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_intents (
                order_id, processor, user_id, amount_minor, currency, status,
                external_ref, checkout_url, ledger_transaction_id, expires_at,
                metadata, created_at, updated_at, settled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(intent.order_id.as_str())
        .bind(intent.processor.slug())
        .bind(intent.user_id.as_i64())
        .bind(intent.amount_minor)
        .bind(intent.currency.code())
        .bind(intent.status.as_str())
        .bind(intent.external_ref.as_deref())
        .bind(intent.checkout_url.as_deref())
        .bind(intent.ledger_transaction_id.map(|id| *id.as_uuid()))
        .bind(intent.expires_at.as_datetime())
        .bind(Json(&intent.metadata))
        .bind(intent.created_at.as_datetime())
        .bind(intent.updated_at.as_datetime())
        .bind(intent.settled_at.as_ref().map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Intent {} already exists", intent.order_id),
            )),
            Err(e) => Err(DomainError::database("Failed to insert payment intent", e)),
        }
    }

    async fn find(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, DomainError> {
        let row: Option<IntentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_intents WHERE order_id = $1",
            INTENT_COLUMNS
        ))
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch payment intent", e))?;

        row.map(PaymentIntent::try_from).transpose()
    }

    async fn mark_pending(
        &self,
        order_id: &OrderId,
        external_ref: Option<&str>,
        checkout_url: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents SET
                status = 'pending',
                external_ref = COALESCE($2, external_ref),
                checkout_url = $3,
                updated_at = $4
            WHERE order_id = $1 AND status = 'created'
            "#,
        )
        .bind(order_id.as_str())
        .bind(external_ref)
        .bind(checkout_url)
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to mark intent pending", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, order_id: &OrderId, now: Timestamp) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents SET status = 'failed', updated_at = $2
            WHERE order_id = $1
              AND ledger_transaction_id IS NULL
              AND status IN ('created', 'pending')
            "#,
        )
        .bind(order_id.as_str())
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to mark intent failed", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit_settlement(
        &self,
        order_id: &OrderId,
        transaction: &LedgerTransaction,
        external_ref: Option<&str>,
        now: Timestamp,
    ) -> Result<CommitResult, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database("Failed to begin settlement transaction", e))?;

        let stamped = sqlx::query(
            r#"
            UPDATE payment_intents SET
                ledger_transaction_id = $2,
                status = 'settled',
                external_ref = COALESCE(external_ref, $3),
                settled_at = $4,
                updated_at = $4
            WHERE order_id = $1
              AND ledger_transaction_id IS NULL
              AND status <> 'expired'
              AND expires_at >= $4
            "#,
        )
        .bind(order_id.as_str())
        .bind(transaction.id.as_uuid())
        .bind(external_ref)
        .bind(now.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| DomainError::database("Failed to stamp intent settled", e))?;

        if stamped.rows_affected() == 0 {
            let guard: Option<GuardRow> = sqlx::query_as(
                "SELECT status, ledger_transaction_id FROM payment_intents WHERE order_id = $1",
            )
            .bind(order_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| DomainError::database("Failed to read intent after guard miss", e))?;

            tx.rollback()
                .await
                .map_err(|e| DomainError::database("Failed to roll back settlement", e))?;

            return Ok(match guard {
                None => CommitResult::Missing,
                Some(row) if row.ledger_transaction_id.is_some() => CommitResult::AlreadySettled,
                Some(row) if row.status == IntentStatus::Settled.as_str() => CommitResult::AlreadySettled,
                Some(_) => CommitResult::Expired,
            });
        }

        match insert_ledger_row(&mut *tx, transaction).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback()
                    .await
                    .map_err(|e| DomainError::database("Failed to roll back settlement", e))?;
                return Err(DomainError::new(
                    ErrorCode::Conflict,
                    "Ledger external reference already recorded",
                ));
            }
            Err(e) => return Err(DomainError::database("Failed to insert ledger row", e)),
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::database("Failed to commit settlement", e))?;

        Ok(CommitResult::Committed)
    }

    async fn list_reconcilable(
        &self,
        created_before: Timestamp,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, DomainError> {
        let rows: Vec<IntentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payment_intents
            WHERE status IN ('pending', 'failed')
              AND ledger_transaction_id IS NULL
              AND created_at < $1
              AND expires_at >= $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
            INTENT_COLUMNS
        ))
        .bind(created_before.as_datetime())
        .bind(now.as_datetime())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to list reconcilable intents", e))?;

        rows.into_iter().map(PaymentIntent::try_from).collect()
    }

    async fn expire_overdue(&self, now: Timestamp, limit: i64) -> Result<Vec<OrderId>, DomainError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE payment_intents SET status = 'expired', updated_at = $1
            WHERE order_id IN (
                SELECT order_id FROM payment_intents
                WHERE ledger_transaction_id IS NULL
                  AND status IN ('created', 'pending', 'failed')
                  AND expires_at < $1
                ORDER BY expires_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            AND ledger_transaction_id IS NULL
            RETURNING order_id
            "#,
        )
        .bind(now.as_datetime())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to expire overdue intents", e))?;

        ids.into_iter()
            .map(|(id,)| {
                OrderId::new(id).map_err(|e| {
                    DomainError::new(ErrorCode::DatabaseError, format!("Invalid order_id: {}", e))
                })
            })
            .collect()
    }
}

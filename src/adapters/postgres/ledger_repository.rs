//! PostgreSQL implementation of LedgerRepository.
//!
//! `ledger_transactions.external_ref` carries a unique index; appends rely on
//! it instead of a read-then-insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgQueryResult;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::domain::foundation::{Currency, DomainError, ErrorCode, OrderId, Timestamp, TransactionId, UserId};
use crate::domain::settlement::{LedgerKind, LedgerTransaction, Processor};
use crate::ports::{LedgerRepository, SaveResult};

const LEDGER_COLUMNS: &str = "id, user_id, amount_minor, currency, kind, processor, \
     external_ref, order_id, description, is_completed, completed_at, created_at";

/// Inserts one ledger row on any executor, so the settlement transaction can share it.
pub(super) async fn insert_ledger_row<'e, E>(
    executor: E,
    transaction: &LedgerTransaction,
) -> Result<PgQueryResult, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO ledger_transactions (
            id, user_id, amount_minor, currency, kind, processor,
            external_ref, order_id, description, is_completed, completed_at, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(transaction.id.as_uuid())
    .bind(transaction.user_id.as_i64())
    .bind(transaction.amount_minor)
    .bind(transaction.currency.code())
    .bind(transaction.kind.as_str())
    .bind(transaction.processor.map(|p| p.slug()))
    .bind(transaction.external_ref.as_deref())
    .bind(transaction.order_id.as_ref().map(|o| o.as_str().to_string()))
    .bind(&transaction.description)
    .bind(transaction.is_completed)
    .bind(transaction.completed_at.as_ref().map(|t| *t.as_datetime()))
    .bind(transaction.created_at.as_datetime())
    .execute(executor)
    .await
}

/// PostgreSQL implementation of the LedgerRepository port.
#[derive(Clone)]
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: i64,
    amount_minor: i64,
    currency: String,
    kind: String,
    processor: Option<String>,
    external_ref: Option<String>,
    order_id: Option<String>,
    description: String,
    is_completed: bool,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerTransaction {
    type Error = DomainError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let invalid = |field: &str, e: String| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid {} in ledger row {}: {}", field, row.id, e),
            )
        };

        let processor = row
            .processor
            .as_deref()
            .map(str::parse::<Processor>)
            .transpose()
            .map_err(|e| invalid("processor", e.to_string()))?;
        let order_id = row
            .order_id
            .map(OrderId::new)
            .transpose()
            .map_err(|e| invalid("order_id", e.to_string()))?;

        Ok(LedgerTransaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            amount_minor: row.amount_minor,
            currency: row
                .currency
                .parse::<Currency>()
                .map_err(|e| invalid("currency", e.to_string()))?,
            kind: row
                .kind
                .parse::<LedgerKind>()
                .map_err(|e| invalid("kind", e.to_string()))?,
            processor,
            external_ref: row.external_ref,
            order_id,
            description: row.description,
            is_completed: row.is_completed,
            completed_at: row.completed_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn append(&self, transaction: &LedgerTransaction) -> Result<SaveResult, DomainError> {
        match insert_ledger_row(&self.pool, transaction).await {
            Ok(_) => Ok(SaveResult::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(SaveResult::AlreadyExists)
            }
            Err(e) => Err(DomainError::database("Failed to append ledger row", e)),
        }
    }

    async fn find(&self, id: TransactionId) -> Result<Option<LedgerTransaction>, DomainError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_transactions WHERE id = $1",
            LEDGER_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch ledger row", e))?;

        row.map(LedgerTransaction::try_from).transpose()
    }

    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<LedgerTransaction>, DomainError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_transactions WHERE external_ref = $1",
            LEDGER_COLUMNS
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch ledger row", e))?;

        row.map(LedgerTransaction::try_from).transpose()
    }

    async fn lifetime_deposits(&self, user_id: UserId) -> Result<i64, DomainError> {
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount_minor), 0)::BIGINT
            FROM ledger_transactions
            WHERE user_id = $1 AND kind = 'deposit' AND is_completed
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to sum deposits", e))?;

        Ok(total)
    }

    async fn list_uncredited_deposits(
        &self,
        completed_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM ledger_transactions
            WHERE kind = 'deposit'
              AND is_completed
              AND balance_applied_at IS NULL
              AND completed_at <= $1
            ORDER BY completed_at
            LIMIT $2
            "#,
            LEDGER_COLUMNS
        ))
        .bind(completed_before.as_datetime())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to list uncredited deposits", e))?;

        rows.into_iter().map(LedgerTransaction::try_from).collect()
    }
}

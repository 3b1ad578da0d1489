//! PostgreSQL implementation of UserAccounts.
//!
//! A credit is applied once per ledger transaction: the row's
//! `balance_applied_at` marker and the balance increment commit together.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, TransactionId, UserId};
use crate::ports::{CreditResult, UserAccount, UserAccounts};

#[derive(Clone)]
pub struct PostgresUserAccounts {
    pool: PgPool,
}

impl PostgresUserAccounts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, telegram_id, email, language, balance_minor, has_made_first_topup, referred_by, promo_tier";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    telegram_id: Option<i64>,
    email: Option<String>,
    language: String,
    balance_minor: i64,
    has_made_first_topup: bool,
    referred_by: Option<i64>,
    promo_tier: Option<String>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: UserId::new(row.id),
            telegram_id: row.telegram_id,
            email: row.email,
            language: row.language,
            balance_minor: row.balance_minor,
            has_made_first_topup: row.has_made_first_topup,
            referred_by: row.referred_by.map(UserId::new),
            promo_tier: row.promo_tier,
        }
    }
}

#[async_trait]
impl UserAccounts for PostgresUserAccounts {
    async fn find(&self, id: UserId) -> Result<Option<UserAccount>, DomainError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DomainError::database("Failed to fetch user", e))?;

        Ok(row.map(UserAccount::from))
    }

    async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserAccount>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE telegram_id = $1",
            USER_COLUMNS
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to fetch user by telegram id", e))?;

        Ok(row.map(UserAccount::from))
    }

    async fn apply_credit(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
        amount_minor: i64,
    ) -> Result<CreditResult, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database("Failed to begin credit transaction", e))?;

        let marked: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE ledger_transactions SET balance_applied_at = NOW()
            WHERE id = $1 AND balance_applied_at IS NULL
            RETURNING kind
            "#,
        )
        .bind(transaction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| DomainError::database("Failed to mark ledger row credited", e))?;

        let Some((kind,)) = marked else {
            tx.rollback()
                .await
                .map_err(|e| DomainError::database("Failed to roll back credit", e))?;
            return Ok(CreditResult::AlreadyApplied);
        };
        let is_deposit = kind == "deposit";

        let previous: Option<(bool,)> =
            sqlx::query_as("SELECT has_made_first_topup FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id.as_i64())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| DomainError::database("Failed to lock user", e))?;

        let Some((had_first_topup,)) = previous else {
            tx.rollback()
                .await
                .map_err(|e| DomainError::database("Failed to roll back credit", e))?;
            return Err(DomainError::new(
                ErrorCode::UserNotFound,
                format!("User {} not found", user_id),
            ));
        };

        let (new_balance_minor,): (i64,) = sqlx::query_as(
            r#"
            UPDATE users SET
                balance_minor = balance_minor + $2,
                has_made_first_topup = has_made_first_topup OR $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING balance_minor
            "#,
        )
        .bind(user_id.as_i64())
        .bind(amount_minor)
        .bind(is_deposit)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DomainError::database("Failed to credit balance", e))?;

        tx.commit()
            .await
            .map_err(|e| DomainError::database("Failed to commit credit", e))?;

        Ok(CreditResult::Applied {
            new_balance_minor,
            first_topup: is_deposit && !had_first_topup,
        })
    }

    async fn set_promo_tier(
        &self,
        user_id: UserId,
        expected: Option<&str>,
        tier: &str,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET promo_tier = $3, updated_at = NOW()
            WHERE id = $1 AND promo_tier IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(user_id.as_i64())
        .bind(expected)
        .bind(tier)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to set promo tier", e))?;

        Ok(result.rows_affected() == 1)
    }
}

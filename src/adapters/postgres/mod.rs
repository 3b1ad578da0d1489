//! PostgreSQL adapters - Database implementations for the store ports.
//!
//! - `PostgresPaymentIntentStore` - intents and the settle-and-record guard
//! - `PostgresLedgerRepository` - append-only ledger rows
//! - `PostgresUserAccounts` - balances, first top-up flag, promo tier
//! - `PostgresSubscriptionRepository` - subscriptions with the external-update stamp

mod ledger_repository;
mod payment_intent_store;
mod subscription_repository;
mod user_accounts;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::domain::foundation::{DomainError, ErrorCode};

pub use ledger_repository::PostgresLedgerRepository;
pub use payment_intent_store::PostgresPaymentIntentStore;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use user_accounts::PostgresUserAccounts;

/// Opens the connection pool and runs pending migrations when enabled.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    let url = config
        .connection_url()
        .ok_or_else(|| DomainError::new(ErrorCode::DatabaseError, "Database URL not configured"))?;
    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
        .connect(url)
        .await
        .map_err(|e| DomainError::database("Failed to connect to database", e))?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DomainError::database("Failed to run migrations", e))?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}

//! Collaborators that only log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::foundation::{DomainError, UserId};
use crate::ports::{AdminNotice, CartOutcome, CartResumer, Notifier, UserNotice};

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_user(&self, notice: &UserNotice) -> Result<(), DomainError> {
        info!(
            user_id = %notice.user_id,
            kind = %notice.kind,
            params = ?notice.params,
            "User notice"
        );
        Ok(())
    }

    async fn notify_admin(&self, notice: &AdminNotice) -> Result<(), DomainError> {
        info!(
            kind = %notice.kind,
            title = %notice.title,
            fields = ?notice.fields,
            "Admin notice"
        );
        Ok(())
    }
}

/// Reports every user as having no saved cart.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCartResumer;

#[async_trait]
impl CartResumer for NoopCartResumer {
    async fn resume(&self, _user_id: UserId) -> Result<CartOutcome, DomainError> {
        Ok(CartOutcome::NoCart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_resumer_reports_no_cart() {
        assert_eq!(NoopCartResumer.resume(UserId::new(3)).await.unwrap(), CartOutcome::NoCart);
    }
}

//! Recording collaborators: notifier, cart resumer, panel and listener fakes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::foundation::{DomainError, ErrorCode, PanelUserId, UserId};
use crate::ports::{
    AdminNotice, CartOutcome, CartResumer, Notifier, PanelError, PanelUserSnapshot,
    ProvisioningPanel, SettledPayment, SettlementListener, UserNotice,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notifier that keeps every notice it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    users: Mutex<Vec<UserNotice>>,
    admins: Mutex<Vec<AdminNotice>>,
    failures_left: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` deliveries of either kind.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn user_notices(&self) -> Vec<UserNotice> {
        guard(&self.users).clone()
    }

    pub fn admin_notices(&self) -> Vec<AdminNotice> {
        guard(&self.admins).clone()
    }

    fn take_failure(&self) -> Result<(), DomainError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(DomainError::new(ErrorCode::ExternalServiceError, "notifier unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, notice: &UserNotice) -> Result<(), DomainError> {
        self.take_failure()?;
        guard(&self.users).push(notice.clone());
        Ok(())
    }

    async fn notify_admin(&self, notice: &AdminNotice) -> Result<(), DomainError> {
        self.take_failure()?;
        guard(&self.admins).push(notice.clone());
        Ok(())
    }
}

/// Cart resumer answering with a fixed outcome.
pub struct FixedCartResumer {
    outcome: CartOutcome,
    calls: Mutex<Vec<UserId>>,
}

impl FixedCartResumer {
    pub fn new(outcome: CartOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<UserId> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl CartResumer for FixedCartResumer {
    async fn resume(&self, user_id: UserId) -> Result<CartOutcome, DomainError> {
        guard(&self.calls).push(user_id);
        Ok(self.outcome)
    }
}

/// Panel with a fixed set of users.
#[derive(Default)]
pub struct StaticPanel {
    users: Mutex<HashMap<PanelUserId, Result<PanelUserSnapshot, PanelError>>>,
}

impl StaticPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user(&self, snapshot: PanelUserSnapshot) {
        guard(&self.users).insert(snapshot.panel_user_id, Ok(snapshot));
    }

    pub fn fail_user(&self, panel_user_id: PanelUserId, error: PanelError) {
        guard(&self.users).insert(panel_user_id, Err(error));
    }
}

#[async_trait]
impl ProvisioningPanel for StaticPanel {
    async fn fetch_user(
        &self,
        panel_user_id: PanelUserId,
    ) -> Result<Option<PanelUserSnapshot>, PanelError> {
        guard(&self.users)
            .get(&panel_user_id)
            .cloned()
            .transpose()
    }
}

/// Listener that records finalized payments instead of acting on them.
#[derive(Default)]
pub struct RecordingListener {
    settled: Mutex<Vec<SettledPayment>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settled(&self) -> Vec<SettledPayment> {
        guard(&self.settled).clone()
    }
}

impl SettlementListener for RecordingListener {
    fn on_settled(&self, payment: SettledPayment) {
        guard(&self.settled).push(payment);
    }
}

//! ProvisioningPanel port - status queries against the panel API.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{PanelUserId, Timestamp};
use crate::domain::subscription::PanelUserFields;

/// A panel user as observed at `taken_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelUserSnapshot {
    pub panel_user_id: PanelUserId,
    pub fields: PanelUserFields,
    /// When the request that produced this snapshot was sent.
    pub taken_at: Timestamp,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PanelError {
    #[error("Panel request failed: {0}")]
    Transient(String),

    #[error("Unexpected panel response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ProvisioningPanel: Send + Sync {
    /// Current state of one panel user. `Ok(None)` if the panel has no such user.
    async fn fetch_user(&self, panel_user_id: PanelUserId) -> Result<Option<PanelUserSnapshot>, PanelError>;
}

//! Notifier port - user and operator notifications.
//!
//! Channel selection (bot message, email, realtime push) belongs to the
//! implementation. Callers only describe what happened.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::foundation::{DomainError, UserId};

/// Notice for the paying or affected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotice {
    pub user_id: UserId,
    /// Template key, e.g. `payment_settled` or `subscription_disabled`.
    pub kind: String,
    pub params: BTreeMap<String, String>,
}

impl UserNotice {
    pub fn new(user_id: UserId, kind: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Notice for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminNotice {
    pub kind: String,
    pub title: String,
    pub fields: BTreeMap<String, String>,
}

impl AdminNotice {
    pub fn new(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, notice: &UserNotice) -> Result<(), DomainError>;

    async fn notify_admin(&self, notice: &AdminNotice) -> Result<(), DomainError>;
}

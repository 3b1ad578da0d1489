//! JSON-over-HTTP collaborators.
//!
//! The bot or cabinet backend owns message delivery and carts; this side
//! only POSTs what happened and reads back a small answer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::{AdminNotice, CartOutcome, CartResumer, Notifier, UserNotice};

use super::LoggingNotifier;

async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
    timeout: Duration,
) -> Result<reqwest::Response, DomainError> {
    let response = client
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            warn!(url, error = %e, "Callback request failed");
            DomainError::new(ErrorCode::ExternalServiceError, format!("callback failed: {}", e))
        })?;

    if !response.status().is_success() {
        warn!(url, status = %response.status(), "Callback returned error status");
        return Err(DomainError::new(
            ErrorCode::ExternalServiceError,
            format!("callback returned {}", response.status()),
        ));
    }
    Ok(response)
}

/// Notifier posting to per-kind URLs; a kind without a URL is only logged.
pub struct HttpCallbackNotifier {
    client: Client,
    user_url: Option<String>,
    admin_url: Option<String>,
    timeout: Duration,
    fallback: LoggingNotifier,
}

impl HttpCallbackNotifier {
    pub fn new(user_url: Option<String>, admin_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            user_url,
            admin_url,
            timeout,
            fallback: LoggingNotifier,
        }
    }
}

#[async_trait]
impl Notifier for HttpCallbackNotifier {
    async fn notify_user(&self, notice: &UserNotice) -> Result<(), DomainError> {
        match &self.user_url {
            Some(url) => post_json(&self.client, url, notice, self.timeout).await.map(|_| ()),
            None => self.fallback.notify_user(notice).await,
        }
    }

    async fn notify_admin(&self, notice: &AdminNotice) -> Result<(), DomainError> {
        match &self.admin_url {
            Some(url) => post_json(&self.client, url, notice, self.timeout).await.map(|_| ()),
            None => self.fallback.notify_admin(notice).await,
        }
    }
}

#[derive(Serialize)]
struct CartResumeRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct CartResumeResponse {
    outcome: CartOutcome,
}

/// Cart resumer backed by the shop's callback endpoint.
pub struct HttpCartResumer {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpCartResumer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CartResumer for HttpCartResumer {
    async fn resume(&self, user_id: UserId) -> Result<CartOutcome, DomainError> {
        let response = post_json(&self.client, &self.url, &CartResumeRequest { user_id }, self.timeout).await?;
        let body: CartResumeResponse = response.json().await.map_err(|e| {
            DomainError::new(
                ErrorCode::ExternalServiceError,
                format!("unexpected cart response: {}", e),
            )
        })?;
        Ok(body.outcome)
    }
}

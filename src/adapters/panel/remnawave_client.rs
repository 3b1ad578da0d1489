//! Remnawave panel API client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::foundation::{PanelUserId, Timestamp};
use crate::domain::subscription::PanelUserFields;
use crate::ports::{PanelError, PanelUserSnapshot, ProvisioningPanel};

pub struct RemnawaveClient {
    client: Client,
    base_url: String,
    api_token: SecretString,
    timeout: Duration,
}

impl RemnawaveClient {
    pub fn new(base_url: impl Into<String>, api_token: SecretString, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            timeout,
        }
    }

    fn user_url(&self, panel_user_id: PanelUserId) -> String {
        format!("{}/api/users/{}", self.base_url, panel_user_id)
    }
}

/// Panel responses wrap the payload in `response`.
fn user_payload(body: &Value) -> Option<&Value> {
    body.get("response").filter(|v| v.is_object())
}

#[async_trait]
impl ProvisioningPanel for RemnawaveClient {
    async fn fetch_user(&self, panel_user_id: PanelUserId) -> Result<Option<PanelUserSnapshot>, PanelError> {
        let taken_at = Timestamp::now();
        let response = self
            .client
            .get(self.user_url(panel_user_id))
            .bearer_auth(self.api_token.expose_secret())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(panel_user_id = %panel_user_id, error = %e, "Panel request failed");
                PanelError::Transient(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(panel_user_id = %panel_user_id, "Panel user not found");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(panel_user_id = %panel_user_id, status = %status, "Panel returned error status");
            return Err(PanelError::Transient(format!("status {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PanelError::Malformed(e.to_string()))?;
        let payload = user_payload(&body)
            .ok_or_else(|| PanelError::Malformed("missing response object".to_string()))?;

        Ok(Some(PanelUserSnapshot {
            panel_user_id,
            fields: PanelUserFields::from_json(payload),
            taken_at,
        }))
    }
}

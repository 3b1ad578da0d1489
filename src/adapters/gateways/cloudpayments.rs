//! CloudPayments adapter.
//!
//! Notifications carry `Content-HMAC` (over the raw body) or
//! `X-Content-HMAC` (over the URL-decoded body); either header may be
//! checked against either form. Bodies arrive form-encoded or as JSON.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::domain::foundation::{Currency, OrderId};
use crate::domain::settlement::{PaymentState, Processor, SettlementEvent};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError, WebhookAck,
};

use super::http_client::GatewayHttpClient;
use super::signing;
use super::{json_text, minor_from_json, GatewaySettings};

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudpayments.ru";

pub struct CloudPaymentsCredentials {
    pub public_id: String,
    pub api_secret: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    model: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderModel {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentModel {
    transaction_id: Option<Value>,
    amount: Option<Value>,
    currency: Option<String>,
    status: Option<String>,
}

fn state_for(status: &str) -> PaymentState {
    match status {
        "Completed" | "Authorized" => PaymentState::Paid,
        "Declined" | "Cancelled" => PaymentState::Failed,
        _ => PaymentState::Pending,
    }
}

/// `unquote_plus`: `+` becomes a space, then percent-decoding.
fn url_decoded(body: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(body).ok()?;
    let spaced = text.replace('+', " ");
    urlencoding::decode(&spaced)
        .ok()
        .map(|decoded| decoded.into_owned().into_bytes())
}

/// Notification fields as text, from either a form or a JSON object body.
fn notification_fields(body: &[u8]) -> Result<HashMap<String, String>, VerificationError> {
    let trimmed = body.iter().position(|b| !b.is_ascii_whitespace()).map(|i| &body[i..]);
    if trimmed.is_some_and(|b| b.first() == Some(&b'{')) {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| VerificationError::Malformed("body is not an object".to_string()))?;
        Ok(object
            .iter()
            .filter_map(|(k, v)| json_text(v).map(|text| (k.clone(), text)))
            .collect())
    } else {
        Ok(signing::parse_form(body))
    }
}

pub struct CloudPaymentsAdapter {
    credentials: CloudPaymentsCredentials,
    settings: GatewaySettings,
    http: GatewayHttpClient,
}

impl CloudPaymentsAdapter {
    pub fn new(credentials: CloudPaymentsCredentials, settings: GatewaySettings) -> Self {
        let http = GatewayHttpClient::new(
            Processor::CloudPayments.slug(),
            settings.api_base_url.clone(),
            settings.request_timeout,
        );
        Self {
            credentials,
            settings,
            http,
        }
    }

    fn verify_signature(&self, body: &[u8], provided_b64: &str) -> Result<(), VerificationError> {
        let provided = BASE64
            .decode(provided_b64)
            .map_err(|_| VerificationError::InvalidSignature)?;
        let key = self.credentials.api_secret.expose_secret().as_bytes();

        if signing::constant_time_eq(&signing::hmac_sha256(key, body), &provided) {
            return Ok(());
        }
        if let Some(decoded) = url_decoded(body) {
            if signing::constant_time_eq(&signing::hmac_sha256(key, &decoded), &provided) {
                return Ok(());
            }
        }
        Err(VerificationError::InvalidSignature)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(
            &self.credentials.public_id,
            Some(self.credentials.api_secret.expose_secret()),
        )
    }
}

#[async_trait]
impl GatewayAdapter for CloudPaymentsAdapter {
    fn processor(&self) -> Processor {
        Processor::CloudPayments
    }

    fn amount_limits(&self) -> AmountLimits {
        self.settings.limits
    }

    fn currency(&self) -> Currency {
        self.settings.currency
    }

    fn intent_ttl_secs(&self) -> i64 {
        self.settings.intent_ttl_secs
    }

    async fn open_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, GatewayError> {
        let mut payload = json!({
            "Amount": request.currency.to_major_f64(request.amount_minor),
            "Currency": request.currency.code(),
            "Description": request.description,
            "AccountId": request.user_id.to_string(),
            "InvoiceId": request.order_id.as_str(),
            "JsonData": { "user_id": request.user_id.as_i64(), "invoice_id": request.order_id.as_str() },
        });
        if let Some(email) = &request.email {
            payload["Email"] = Value::String(email.clone());
        }

        let response: ApiResponse<OrderModel> = self
            .http
            .send(|http| self.request(http.post("orders/create")).json(&payload))
            .await?;

        if !response.success {
            return Err(GatewayError::Provider(
                response.message.unwrap_or_else(|| "order creation refused".to_string()),
            ));
        }
        let checkout_url = response
            .model
            .and_then(|m| m.url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing payment url".to_string()))?;

        Ok(Checkout {
            checkout_url,
            external_ref: None,
        })
    }

    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        let provided = signing::header(webhook.headers, "content-hmac")
            .or_else(|| signing::header(webhook.headers, "x-content-hmac"))
            .ok_or(VerificationError::MissingSignature)?;
        self.verify_signature(webhook.body, provided)?;

        let fields = notification_fields(webhook.body)?;
        let order_id = OrderId::new(signing::field(&fields, "InvoiceId")?)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let currency = fields
            .get("Currency")
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(self.settings.currency);
        let amount_minor = currency
            .parse_major(signing::field(&fields, "Amount")?)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;

        // Fail notifications carry a reason instead of a status.
        let raw_status = match fields.get("Status").map(String::as_str) {
            Some(status) if !status.is_empty() => status.to_string(),
            _ if fields.contains_key("Reason") || fields.contains_key("ReasonCode") => "Declined".to_string(),
            _ => "Pending".to_string(),
        };
        let external_ref = fields
            .get("TransactionId")
            .filter(|id| !id.is_empty())
            .cloned();

        Ok(SettlementEvent::verified(
            Processor::CloudPayments,
            order_id,
            external_ref,
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let payload = json!({ "InvoiceId": lookup.order_id.as_str() });
        let response: ApiResponse<PaymentModel> = self
            .http
            .send(|http| self.request(http.post("v2/payments/find")).json(&payload))
            .await?;

        let Some(model) = response.model.filter(|_| response.success) else {
            debug!(
                order_id = lookup.order_id.as_str(),
                message = response.message.as_deref().unwrap_or(""),
                "CloudPayments has no payment for invoice"
            );
            return Err(PollError::NotFound);
        };

        let currency = model
            .currency
            .as_deref()
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(lookup.currency);
        let amount_minor = model
            .amount
            .as_ref()
            .and_then(|a| minor_from_json(a, currency))
            .ok_or_else(|| PollError::Transient("payment amount missing".to_string()))?;
        let raw_status = model.status.unwrap_or_default();

        Ok(SettlementEvent::verified(
            Processor::CloudPayments,
            lookup.order_id.clone(),
            model.transaction_id.as_ref().and_then(json_text),
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }

    fn acknowledgement(&self) -> WebhookAck {
        WebhookAck::Json(json!({ "code": 0 }))
    }
}

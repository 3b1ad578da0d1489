//! Pal24 (PayPalych) adapter.
//!
//! Postbacks are form bodies signed with
//! `SignatureValue = upper(md5("OutSum:InvId:api_token"))`. Status polls need
//! the bill id returned at checkout.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::foundation::{Currency, OrderId};
use crate::domain::settlement::{PaymentState, Processor, SettlementEvent};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError, WebhookAck,
};

use super::http_client::GatewayHttpClient;
use super::signing;
use super::{minor_from_json, GatewaySettings};

pub const DEFAULT_API_BASE_URL: &str = "https://pal24.pro/api/v1";

pub struct Pal24Credentials {
    pub shop_id: String,
    pub api_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct CreateBillResponse {
    #[serde(default)]
    success: Value,
    link_page_url: Option<String>,
    link_url: Option<String>,
    bill_id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BillStatusResponse {
    #[serde(default)]
    success: Value,
    status: Option<String>,
    amount: Option<Value>,
    currency_in: Option<String>,
}

/// Pal24 sends `success` as a bool or as the string `"true"`.
fn is_success(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn state_for(status: &str) -> PaymentState {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" | "OVERPAID" => PaymentState::Paid,
        "FAIL" | "CANCELLED" => PaymentState::Failed,
        _ => PaymentState::Pending,
    }
}

pub struct Pal24Adapter {
    credentials: Pal24Credentials,
    settings: GatewaySettings,
    http: GatewayHttpClient,
}

impl Pal24Adapter {
    pub fn new(credentials: Pal24Credentials, settings: GatewaySettings) -> Self {
        let http = GatewayHttpClient::new(
            Processor::Pal24.slug(),
            settings.api_base_url.clone(),
            settings.request_timeout,
        );
        Self {
            credentials,
            settings,
            http,
        }
    }

    fn expected_signature(&self, out_sum: &str, inv_id: &str) -> String {
        signing::md5_hex(
            format!("{}:{}:{}", out_sum, inv_id, self.credentials.api_token.expose_secret()).as_bytes(),
        )
        .to_ascii_uppercase()
    }
}

#[async_trait]
impl GatewayAdapter for Pal24Adapter {
    fn processor(&self) -> Processor {
        Processor::Pal24
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
        let mut form = vec![
            ("amount", request.currency.format_major(request.amount_minor)),
            ("shop_id", self.credentials.shop_id.clone()),
            ("order_id", request.order_id.as_str().to_string()),
            ("description", request.description.clone()),
            ("type", "normal".to_string()),
            ("currency_in", request.currency.code().to_string()),
            ("ttl", self.settings.intent_ttl_secs.to_string()),
        ];
        if let Some(email) = &request.email {
            form.push(("payer_email", email.clone()));
        }

        let token = self.credentials.api_token.expose_secret();
        let response: CreateBillResponse = self
            .http
            .send(|http| http.post("bill/create").bearer_auth(token).form(&form))
            .await?;

        if !is_success(&response.success) {
            return Err(GatewayError::Provider(
                response.message.unwrap_or_else(|| "bill creation refused".to_string()),
            ));
        }
        let checkout_url = response
            .link_page_url
            .or(response.link_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing link_page_url".to_string()))?;

        Ok(Checkout {
            checkout_url,
            external_ref: response.bill_id,
        })
    }

    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        let form = signing::parse_form(webhook.body);
        let provided = form
            .get("SignatureValue")
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .ok_or(VerificationError::MissingSignature)?;
        let out_sum = signing::field(&form, "OutSum")?;
        let inv_id = signing::field(&form, "InvId")?;

        let expected = self.expected_signature(out_sum, inv_id);
        if !signing::constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            return Err(VerificationError::InvalidSignature);
        }

        let order_id = OrderId::new(inv_id).map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let currency = form
            .get("CurrencyIn")
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(self.settings.currency);
        let amount_minor = currency
            .parse_major(out_sum)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let raw_status = signing::field(&form, "Status")?.to_string();
        let external_ref = form.get("TrsId").filter(|id| !id.is_empty()).cloned();

        Ok(SettlementEvent::verified(
            Processor::Pal24,
            order_id,
            external_ref,
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let Some(bill_id) = lookup.external_ref.as_deref() else {
            return Err(PollError::NotFound);
        };

        let token = self.credentials.api_token.expose_secret();
        let response: BillStatusResponse = self
            .http
            .send(|http| http.get("bill/status").bearer_auth(token).query(&[("id", bill_id)]))
            .await?;

        if !is_success(&response.success) {
            return Err(PollError::NotFound);
        }
        let currency = response
            .currency_in
            .as_deref()
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(lookup.currency);
        let amount_minor = response
            .amount
            .as_ref()
            .and_then(|a| minor_from_json(a, currency))
            .ok_or_else(|| PollError::Transient("bill amount missing".to_string()))?;
        let raw_status = response.status.unwrap_or_default();

        Ok(SettlementEvent::verified(
            Processor::Pal24,
            lookup.order_id.clone(),
            Some(bill_id.to_string()),
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }

    fn acknowledgement(&self) -> WebhookAck {
        WebhookAck::Text("OK")
    }
}

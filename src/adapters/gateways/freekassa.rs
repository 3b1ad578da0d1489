//! KassaAI and Freekassa adapter.
//!
//! Both processors speak the same merchant protocol against different API
//! hosts, so one adapter serves both through a [`FreekassaProfile`].
//!
//! # Webhook
//!
//! Form body with `MERCHANT_ID, AMOUNT, MERCHANT_ORDER_ID, intid, CUR_ID, SIGN`
//! where `SIGN = md5("MERCHANT_ID:AMOUNT:secret_word_2:MERCHANT_ORDER_ID")`.
//! Notifications are only sent for paid orders.
//!
//! # API
//!
//! Requests carry `shopId`, a strictly increasing `nonce` and a `signature`:
//! hex HMAC-SHA256 (keyed by the API key) of the parameter values sorted by
//! key and joined with `|`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::domain::foundation::{Currency, OrderId};
use crate::domain::settlement::{PaymentState, Processor, SettlementEvent};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError, WebhookAck,
};

use super::http_client::GatewayHttpClient;
use super::signing::{self, IpAllowList};
use super::{json_text, minor_from_json, GatewaySettings};

/// Freekassa's published notification addresses.
const FREEKASSA_NOTIFY_IPS: [&str; 4] = [
    "168.119.157.136",
    "168.119.60.227",
    "178.154.197.79",
    "51.250.54.238",
];

/// Host and defaults distinguishing KassaAI from Freekassa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreekassaProfile {
    pub processor: Processor,
    pub default_api_base_url: &'static str,
    default_notify_ips: &'static [&'static str],
}

impl FreekassaProfile {
    pub fn kassa_ai() -> Self {
        Self {
            processor: Processor::KassaAi,
            default_api_base_url: "https://api.fk.life/v1",
            default_notify_ips: &[],
        }
    }

    pub fn freekassa() -> Self {
        Self {
            processor: Processor::Freekassa,
            default_api_base_url: "https://api.freekassa.com/v1",
            default_notify_ips: &FREEKASSA_NOTIFY_IPS,
        }
    }

    /// Allow-list used when configuration names none.
    pub fn default_allow_list(&self) -> IpAllowList {
        IpAllowList::new(
            self.default_notify_ips
                .iter()
                .filter_map(|ip| ip.parse::<IpAddr>().ok())
                .collect(),
        )
    }
}

pub struct FreekassaCredentials {
    pub shop_id: i64,
    pub api_key: SecretString,
    pub secret_word_2: SecretString,
    /// Payment method forced at checkout (e.g. the SBP id), if any.
    pub payment_system_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "orderId")]
    order_id: Option<Value>,
    location: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<OrderRecord>,
}

#[derive(Debug, Deserialize)]
struct OrderRecord {
    merchant_order_id: Option<Value>,
    #[serde(rename = "paymentId")]
    payment_id: Option<Value>,
    fk_order_id: Option<Value>,
    id: Option<Value>,
    amount: Option<Value>,
    currency: Option<String>,
    status: Option<Value>,
}

impl OrderRecord {
    fn matches(&self, order_id: &OrderId) -> bool {
        self.merchant_order_id
            .as_ref()
            .or(self.payment_id.as_ref())
            .and_then(json_text)
            .is_some_and(|key| key == order_id.as_str())
    }

    fn status_code(&self) -> i64 {
        match &self.status {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Order status codes: `1` paid, `8`/`9` failed, anything else still open.
fn state_for(code: i64) -> PaymentState {
    match code {
        1 => PaymentState::Paid,
        8 | 9 => PaymentState::Failed,
        _ => PaymentState::Pending,
    }
}

pub struct FreekassaAdapter {
    profile: FreekassaProfile,
    credentials: FreekassaCredentials,
    settings: GatewaySettings,
    allow_list: IpAllowList,
    http: GatewayHttpClient,
}

impl FreekassaAdapter {
    /// `allowed_ips = None` falls back to the profile's published addresses.
    pub fn new(
        profile: FreekassaProfile,
        credentials: FreekassaCredentials,
        settings: GatewaySettings,
        allowed_ips: Option<Vec<IpAddr>>,
    ) -> Self {
        let allow_list = allowed_ips
            .map(IpAllowList::new)
            .unwrap_or_else(|| profile.default_allow_list());
        let http = GatewayHttpClient::new(
            profile.processor.slug(),
            settings.api_base_url.clone(),
            settings.request_timeout,
        );
        Self {
            profile,
            credentials,
            settings,
            allow_list,
            http,
        }
    }

    /// Hex HMAC-SHA256 over the `|`-joined values in key order.
    fn sign_params(&self, params: &BTreeMap<&'static str, String>) -> String {
        let joined = params.values().map(String::as_str).collect::<Vec<_>>().join("|");
        hex::encode(signing::hmac_sha256(
            self.credentials.api_key.expose_secret().as_bytes(),
            joined.as_bytes(),
        ))
    }

    fn signed_body(&self, mut params: BTreeMap<&'static str, String>, nonce: i64) -> BTreeMap<&'static str, String> {
        params.insert("shopId", self.credentials.shop_id.to_string());
        params.insert("nonce", nonce.to_string());
        let signature = self.sign_params(&params);
        params.insert("signature", signature);
        params
    }

    fn expected_sign(&self, merchant_id: &str, amount: &str, order_id: &str) -> String {
        signing::md5_hex(
            format!(
                "{}:{}:{}:{}",
                merchant_id,
                amount,
                self.credentials.secret_word_2.expose_secret(),
                order_id
            )
            .as_bytes(),
        )
    }

    fn nonce() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl GatewayAdapter for FreekassaAdapter {
    fn processor(&self) -> Processor {
        self.profile.processor
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
        let mut params = BTreeMap::new();
        params.insert("paymentId", request.order_id.as_str().to_string());
        params.insert("amount", request.currency.format_major(request.amount_minor));
        params.insert("currency", request.currency.code().to_string());
        if let Some(email) = &request.email {
            params.insert("email", email.clone());
        }
        if let Some(system) = self.credentials.payment_system_id {
            params.insert("i", system.to_string());
        }
        let body = self.signed_body(params, Self::nonce());

        let response: CreateOrderResponse = self
            .http
            .send(|http| http.post("orders/create").json(&body))
            .await?;

        if response.kind != "success" {
            return Err(GatewayError::Provider(
                response.message.unwrap_or_else(|| "order creation refused".to_string()),
            ));
        }
        let checkout_url = response
            .location
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing location".to_string()))?;

        Ok(Checkout {
            checkout_url,
            external_ref: response.order_id.as_ref().and_then(json_text),
        })
    }

    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        self.allow_list.check(webhook.source_ip)?;

        let form = signing::parse_form(webhook.body);
        let provided = form
            .get("SIGN")
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .ok_or(VerificationError::MissingSignature)?;
        let merchant_id = signing::field(&form, "MERCHANT_ID")?;
        let amount = signing::field(&form, "AMOUNT")?;
        let order_id = signing::field(&form, "MERCHANT_ORDER_ID")?;

        let expected = self.expected_sign(merchant_id, amount, order_id);
        if !signing::constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            return Err(VerificationError::InvalidSignature);
        }
        if merchant_id != self.credentials.shop_id.to_string() {
            return Err(VerificationError::MerchantMismatch);
        }

        let order_id =
            OrderId::new(order_id).map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let currency = self.settings.currency;
        let amount_minor = currency
            .parse_major(amount)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let external_ref = form
            .get("intid")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(SettlementEvent::verified(
            self.profile.processor,
            order_id,
            external_ref,
            amount_minor,
            currency,
            "paid",
            PaymentState::Paid,
        ))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let mut params = BTreeMap::new();
        params.insert("paymentId", lookup.order_id.as_str().to_string());
        let body = self.signed_body(params, Self::nonce());

        let response: OrdersResponse = self
            .http
            .send(|http| http.post("orders").json(&body))
            .await?;

        let Some(order) = response.orders.iter().find(|o| o.matches(&lookup.order_id)) else {
            debug!(order_id = lookup.order_id.as_str(), processor = self.profile.processor.slug(), "Order not listed");
            return Err(PollError::NotFound);
        };

        let currency = order
            .currency
            .as_deref()
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(lookup.currency);
        let amount_minor = order
            .amount
            .as_ref()
            .and_then(|a| minor_from_json(a, currency))
            .ok_or_else(|| {
                warn!(order_id = lookup.order_id.as_str(), "Order status without amount");
                PollError::Transient("order amount missing".to_string())
            })?;
        let code = order.status_code();
        let external_ref = order
            .fk_order_id
            .as_ref()
            .or(order.id.as_ref())
            .and_then(json_text);

        Ok(SettlementEvent::verified(
            self.profile.processor,
            lookup.order_id.clone(),
            external_ref,
            amount_minor,
            currency,
            code.to_string(),
            state_for(code),
        ))
    }

    fn acknowledgement(&self) -> WebhookAck {
        WebhookAck::Text("YES")
    }
}

//! CryptoBot (Crypto Pay API) adapter.
//!
//! Invoices are opened in fiat with `payload = order_id`. Update deliveries
//! are signed with `crypto-pay-api-signature`: hex HMAC-SHA256 of the raw
//! body keyed by SHA-256 of the API token.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::foundation::{Currency, OrderId};
use crate::domain::settlement::{PaymentState, Processor, SettlementEvent};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError,
};

use super::http_client::GatewayHttpClient;
use super::signing;
use super::{json_text, minor_from_json, GatewaySettings};

pub const DEFAULT_API_BASE_URL: &str = "https://pay.crypt.bot/api";
const TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

pub struct CryptoBotCredentials {
    pub api_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    invoice_id: Value,
    status: Option<String>,
    amount: Option<Value>,
    fiat: Option<String>,
    payload: Option<String>,
    bot_invoice_url: Option<String>,
    mini_app_invoice_url: Option<String>,
    web_app_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    items: Vec<Invoice>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_type: String,
    payload: Invoice,
}

fn state_for(status: &str) -> PaymentState {
    match status {
        "paid" => PaymentState::Paid,
        "expired" => PaymentState::Failed,
        _ => PaymentState::Pending,
    }
}

pub struct CryptoBotAdapter {
    credentials: CryptoBotCredentials,
    settings: GatewaySettings,
    http: GatewayHttpClient,
}

impl CryptoBotAdapter {
    pub fn new(credentials: CryptoBotCredentials, settings: GatewaySettings) -> Self {
        let http = GatewayHttpClient::new(
            Processor::CryptoBot.slug(),
            settings.api_base_url.clone(),
            settings.request_timeout,
        );
        Self {
            credentials,
            settings,
            http,
        }
    }

    fn event_from_invoice(
        &self,
        invoice: &Invoice,
        order_id: OrderId,
        fallback_currency: Currency,
    ) -> Option<SettlementEvent> {
        let currency = invoice
            .fiat
            .as_deref()
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(fallback_currency);
        let amount_minor = invoice.amount.as_ref().and_then(|a| minor_from_json(a, currency))?;
        let raw_status = invoice.status.clone().unwrap_or_default();
        Some(SettlementEvent::verified(
            Processor::CryptoBot,
            order_id,
            json_text(&invoice.invoice_id),
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }
}

#[async_trait]
impl GatewayAdapter for CryptoBotAdapter {
    fn processor(&self) -> Processor {
        Processor::CryptoBot
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
        let body = json!({
            "currency_type": "fiat",
            "fiat": request.currency.code(),
            "amount": request.currency.format_major(request.amount_minor),
            "description": request.description,
            "payload": request.order_id.as_str(),
            "expires_in": self.settings.intent_ttl_secs,
        });
        let token = self.credentials.api_token.expose_secret();
        let response: ApiResponse<Invoice> = self
            .http
            .send(|http| http.post("createInvoice").header(TOKEN_HEADER, token.as_str()).json(&body))
            .await?;

        let invoice = match response.result {
            Some(invoice) if response.ok => invoice,
            _ => {
                return Err(GatewayError::Provider(
                    response
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "invoice creation refused".to_string()),
                ))
            }
        };
        let checkout_url = invoice
            .bot_invoice_url
            .or(invoice.mini_app_invoice_url)
            .or(invoice.web_app_invoice_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing invoice url".to_string()))?;

        Ok(Checkout {
            checkout_url,
            external_ref: json_text(&invoice.invoice_id),
        })
    }

    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        let provided = signing::header(webhook.headers, "crypto-pay-api-signature")
            .ok_or(VerificationError::MissingSignature)?;
        let provided = hex::decode(provided).map_err(|_| VerificationError::InvalidSignature)?;
        let key = signing::sha256(self.credentials.api_token.expose_secret().as_bytes());
        let expected = signing::hmac_sha256(&key, webhook.body);
        if !signing::constant_time_eq(&expected, &provided) {
            return Err(VerificationError::InvalidSignature);
        }

        let update: Update = serde_json::from_slice(webhook.body)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        if update.update_type != "invoice_paid" {
            return Err(VerificationError::Malformed(format!(
                "unsupported update type {}",
                update.update_type
            )));
        }
        let order_id = update
            .payload
            .payload
            .as_deref()
            .ok_or_else(|| VerificationError::Malformed("missing invoice payload".to_string()))
            .and_then(|p| OrderId::new(p).map_err(|e| VerificationError::Malformed(e.to_string())))?;

        self.event_from_invoice(&update.payload, order_id, self.settings.currency)
            .ok_or_else(|| VerificationError::Malformed("invoice amount missing".to_string()))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let Some(invoice_id) = lookup.external_ref.as_deref() else {
            return Err(PollError::NotFound);
        };
        let token = self.credentials.api_token.expose_secret();
        let response: ApiResponse<InvoiceList> = self
            .http
            .send(|http| {
                http.get("getInvoices")
                    .header(TOKEN_HEADER, token.as_str())
                    .query(&[("invoice_ids", invoice_id)])
            })
            .await?;

        let Some(invoice) = response
            .result
            .filter(|_| response.ok)
            .and_then(|list| list.items.into_iter().next())
        else {
            debug!(order_id = lookup.order_id.as_str(), invoice_id, "Invoice not listed");
            return Err(PollError::NotFound);
        };

        self.event_from_invoice(&invoice, lookup.order_id.clone(), lookup.currency)
            .ok_or_else(|| PollError::Transient("invoice amount missing".to_string()))
    }
}

//! WATA adapter.
//!
//! Webhooks carry `X-Signature`: base64 RSA PKCS#1 v1.5 SHA-512 signature of
//! the raw body. The verifying key comes from configuration or from the
//! `public-key` endpoint, cached for [`PUBLIC_KEY_TTL`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA512};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::foundation::{Currency, OrderId};
use crate::domain::settlement::{PaymentState, Processor, SettlementEvent};
use crate::ports::{
    AmountLimits, Checkout, CheckoutRequest, GatewayAdapter, GatewayError, InboundWebhook,
    PollError, StatusLookup, VerificationError,
};

use super::http_client::GatewayHttpClient;
use super::signing;
use super::{json_text, minor_from_json, GatewaySettings};

pub const DEFAULT_API_BASE_URL: &str = "https://api.wata.pro/api/h2h";
pub const PUBLIC_KEY_TTL: Duration = Duration::from_secs(3600);

pub struct WataCredentials {
    pub access_token: SecretString,
    /// PEM public key. When absent the key is fetched from the API.
    pub public_key_pem: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkResponse {
    id: Option<Value>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transaction {
    id: Option<Value>,
    status: Option<String>,
    amount: Option<Value>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionPage {
    #[serde(default)]
    items: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    transaction_id: Option<Value>,
    transaction_status: String,
    amount: Value,
    currency: Option<String>,
    order_id: String,
}

struct CachedKey {
    der: Vec<u8>,
    fetched_at: Instant,
}

fn state_for(status: &str) -> PaymentState {
    match status {
        "Paid" => PaymentState::Paid,
        "Declined" => PaymentState::Failed,
        _ => PaymentState::Pending,
    }
}

/// PKCS#1 `RSAPublicKey` DER from a PEM-armored SPKI public key.
fn rsa_key_from_pem(pem: &str) -> Result<Vec<u8>, String> {
    let encoded: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let spki = STANDARD
        .decode(encoded)
        .map_err(|e| format!("public key is not base64: {}", e))?;
    rsa_key_from_spki(&spki).ok_or_else(|| "public key is not an RSA SPKI structure".to_string())
}

/// DER contents of the `rsaEncryption` OID (1.2.840.113549.1.1.1).
const RSA_ENCRYPTION_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// SubjectPublicKeyInfo ::= SEQUENCE { algorithm SEQUENCE, subjectPublicKey BIT STRING }
///
/// Only `rsaEncryption` keys are accepted.
fn rsa_key_from_spki(spki: &[u8]) -> Option<Vec<u8>> {
    let (tag, info, _) = der_element(spki)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, algorithm, rest) = der_element(info)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, oid, _) = der_element(algorithm)?;
    if tag != 0x06 || oid != RSA_ENCRYPTION_OID {
        return None;
    }
    let (tag, bits, _) = der_element(rest)?;
    match bits.split_first() {
        Some((0, key)) if tag == 0x03 => Some(key.to_vec()),
        _ => None,
    }
}

/// Splits one DER element into (tag, contents, remainder).
fn der_element(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let width = (first & 0x7f) as usize;
        if width == 0 || width > 4 || rest.len() < width {
            return None;
        }
        let len = rest[..width]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[width..])
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

pub struct WataAdapter {
    credentials: WataCredentials,
    settings: GatewaySettings,
    http: GatewayHttpClient,
    key_cache: RwLock<Option<CachedKey>>,
}

impl WataAdapter {
    pub fn new(credentials: WataCredentials, settings: GatewaySettings) -> Self {
        let http = GatewayHttpClient::new(
            Processor::Wata.slug(),
            settings.api_base_url.clone(),
            settings.request_timeout,
        );
        Self {
            credentials,
            settings,
            http,
            key_cache: RwLock::new(None),
        }
    }

    async fn verifying_key(&self) -> Result<Vec<u8>, VerificationError> {
        if let Some(pem) = &self.credentials.public_key_pem {
            return rsa_key_from_pem(pem).map_err(VerificationError::Unavailable);
        }

        if let Some(cached) = self.key_cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < PUBLIC_KEY_TTL {
                return Ok(cached.der.clone());
            }
        }

        let mut cache = self.key_cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < PUBLIC_KEY_TTL {
                return Ok(cached.der.clone());
            }
        }
        let response: PublicKeyResponse = self
            .http
            .send(|http| http.get("public-key"))
            .await
            .map_err(|e| {
                warn!(error = %e, "Could not fetch signing key");
                VerificationError::Unavailable(e.to_string())
            })?;
        let der = rsa_key_from_pem(&response.value).map_err(VerificationError::Unavailable)?;
        debug!("Signing key refreshed");
        *cache = Some(CachedKey {
            der: der.clone(),
            fetched_at: Instant::now(),
        });
        Ok(der)
    }

    fn parse_currency(&self, raw: Option<&str>, fallback: Currency) -> Currency {
        raw.and_then(|c| c.parse::<Currency>().ok()).unwrap_or(fallback)
    }
}

#[async_trait]
impl GatewayAdapter for WataAdapter {
    fn processor(&self) -> Processor {
        Processor::Wata
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
            "amount": request.currency.to_major_f64(request.amount_minor),
            "currency": request.currency.code(),
            "description": request.description,
            "orderId": request.order_id.as_str(),
            "type": "OneTime",
        });
        let token = self.credentials.access_token.expose_secret();
        let response: LinkResponse = self
            .http
            .send(|http| http.post("links").bearer_auth(token).json(&body))
            .await?;

        let checkout_url = response
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing link url".to_string()))?;
        Ok(Checkout {
            checkout_url,
            external_ref: response.id.as_ref().and_then(json_text),
        })
    }

    async fn verify_and_normalize(
        &self,
        webhook: InboundWebhook<'_>,
    ) -> Result<SettlementEvent, VerificationError> {
        let provided = signing::header(webhook.headers, "x-signature")
            .ok_or(VerificationError::MissingSignature)?;
        let signature = STANDARD
            .decode(provided.trim())
            .map_err(|_| VerificationError::InvalidSignature)?;

        let key = self.verifying_key().await?;
        UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA512, key)
            .verify(webhook.body, &signature)
            .map_err(|_| VerificationError::InvalidSignature)?;

        let notification: Notification = serde_json::from_slice(webhook.body)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let order_id = OrderId::new(&notification.order_id)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let currency = self.parse_currency(notification.currency.as_deref(), self.settings.currency);
        let amount_minor = minor_from_json(&notification.amount, currency)
            .ok_or_else(|| VerificationError::Malformed("invalid amount".to_string()))?;

        Ok(SettlementEvent::verified(
            Processor::Wata,
            order_id,
            notification.transaction_id.as_ref().and_then(json_text),
            amount_minor,
            currency,
            notification.transaction_status.clone(),
            state_for(&notification.transaction_status),
        ))
    }

    async fn poll_status(&self, lookup: &StatusLookup) -> Result<SettlementEvent, PollError> {
        let token = self.credentials.access_token.expose_secret();
        let order_id = lookup.order_id.as_str();
        let page: TransactionPage = self
            .http
            .send(|http| {
                http.get("transactions").bearer_auth(token).query(&[
                    ("orderId", order_id),
                    ("skipCount", "0"),
                    ("maxResultCount", "5"),
                ])
            })
            .await?;

        let mut items = page.items;
        let position = items
            .iter()
            .position(|t| t.status.as_deref() == Some("Paid"))
            .unwrap_or(0);
        if items.is_empty() {
            return Err(PollError::NotFound);
        }
        let transaction = items.swap_remove(position);

        let currency = self.parse_currency(transaction.currency.as_deref(), lookup.currency);
        let amount_minor = transaction
            .amount
            .as_ref()
            .and_then(|a| minor_from_json(a, currency))
            .ok_or_else(|| PollError::Transient("transaction amount missing".to_string()))?;
        let raw_status = transaction.status.unwrap_or_default();

        Ok(SettlementEvent::verified(
            Processor::Wata,
            lookup.order_id.clone(),
            transaction.id.as_ref().and_then(json_text),
            amount_minor,
            currency,
            raw_status.clone(),
            state_for(&raw_status),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    const PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA3Nq3TRrfx+CnGHhLVkye
6vTFH5bXXsPGOpCnoQVedkGNayK36i3fAW6Fq9w4CUgQC89ZnsLtQfrM6qtZ9Xhy
QQb5NtEtYbfpuA466n1iXEk21VdC6pLTHcxO4TiihlpOw/tDiKTbuA1DTM273lOv
+l2Ld6sIfAT+GoYgZi8FV4GbB8NItQySKkjRG1OssV9wTT2gW1GLDXT1d0/kpcsB
4g0tjCeUURpWX2qm6hcGC6ZmWo7nL5wo8Vj5qhQipBcp0IqfYA6fVBZfF662kKHc
LF0PHc10zWpKBwCP6q5VYUhchtt7r9nbWxhXpXURdWO2+GUcZDZecb3ZoE5/yaOJ
kQIDAQAB
-----END PUBLIC KEY-----
";

    const SIGNATURE: &str = "TyydDHrNiPj86aJx767lSIsKyIZ3Urrh2pVQs76eqwsYUl7F7JcGGU3O8tgyiXEU6Zv/EZqo064nvTpmjKmepUBlzbAN9KiP4BQhFpPh4P79QUDgcOiw+7BKXXd7VB2txPyOi0iE9lsHlrCf76dwNtUW+q9kmU762I41MqkhaKIO7yggWhdCM1qieY1ttydxgXgs8ZcoX5PN7EhwG5mlVNR78oIhwE704qzN6RNA7ER4RlVFQMuS93hzBQmLHpGax6R2fl9MioUDU4m/oMv9kLyjSJ146Yo4rDK3qyJRYmRBwEbrZao869HTZoyCnFeaXs3omtZvQwH78vDjCfsKuw==";

    const BODY: &str = r#"{"transactionType":"CardCrypto","transactionId":"3a16a4f0-27b0-09d1-16da-ba8d5c63eae3","transactionStatus":"Paid","amount":500.00,"currency":"RUB","orderId":"w42_a1b2c3","paymentTime":"2026-10-14T10:00:00Z"}"#;

    fn adapter() -> WataAdapter {
        WataAdapter::new(
            WataCredentials {
                access_token: SecretString::new("wata-token".to_string()),
                public_key_pem: Some(PUBLIC_KEY.to_string()),
            },
            GatewaySettings::new(
                DEFAULT_API_BASE_URL,
                AmountLimits {
                    min_minor: 10_000,
                    max_minor: 10_000_000,
                },
            ),
        )
    }

    async fn verify(body: &[u8], signature: Option<&str>) -> Result<SettlementEvent, VerificationError> {
        let mut headers = HeaderMap::new();
        if let Some(signature) = signature {
            headers.insert("x-signature", HeaderValue::from_str(signature).unwrap());
        }
        adapter()
            .verify_and_normalize(InboundWebhook {
                body,
                headers: &headers,
                source_ip: None,
            })
            .await
    }

    // ══════════════════════════════════════════════════════════════
    // Signature verification
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn signed_notification_is_normalized() {
        let event = verify(BODY.as_bytes(), Some(SIGNATURE)).await.unwrap();

        assert_eq!(event.order_id.as_str(), "w42_a1b2c3");
        assert_eq!(event.amount_minor, 50_000);
        assert_eq!(event.currency, Currency::Rub);
        assert_eq!(
            event.external_ref.as_deref(),
            Some("3a16a4f0-27b0-09d1-16da-ba8d5c63eae3")
        );
        assert_eq!(event.state, PaymentState::Paid);
    }

    #[tokio::test]
    async fn altered_amount_fails_verification() {
        let tampered = BODY.replace("500.00", "900.00");
        let result = verify(tampered.as_bytes(), Some(SIGNATURE)).await;
        assert_eq!(result, Err(VerificationError::InvalidSignature));
    }

    #[tokio::test]
    async fn missing_header_is_reported() {
        assert_eq!(
            verify(BODY.as_bytes(), None).await,
            Err(VerificationError::MissingSignature)
        );
    }

    #[tokio::test]
    async fn non_base64_signature_is_invalid() {
        assert_eq!(
            verify(BODY.as_bytes(), Some("***")).await,
            Err(VerificationError::InvalidSignature)
        );
    }

    // ══════════════════════════════════════════════════════════════
    // Key parsing
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn pem_key_unwraps_to_rsa_public_key() {
        let der = rsa_key_from_pem(PUBLIC_KEY).unwrap();
        // RSAPublicKey ::= SEQUENCE { modulus, publicExponent }
        assert_eq!(der[0], 0x30);
        assert_eq!(der.len(), 270);
    }

    #[test]
    fn garbage_key_is_rejected() {
        assert!(rsa_key_from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----").is_err());
    }

    #[test]
    fn spki_with_other_algorithm_is_rejected() {
        // id-ecPublicKey (1.2.840.10045.2.1) around a dummy point.
        let ec = [
            0x30, 0x10, 0x30, 0x09, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x03,
            0x03, 0x00, 0x04, 0x01,
        ];
        assert_eq!(rsa_key_from_spki(&ec), None);
    }

    #[test]
    fn altered_rsa_oid_is_rejected() {
        let encoded: String = PUBLIC_KEY
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        let mut spki = STANDARD.decode(encoded).unwrap();
        assert!(rsa_key_from_spki(&spki).is_some());

        // Last byte of the algorithm OID: rsaEncryption becomes sha256WithRSAEncryption.
        assert_eq!(spki[16], 0x01);
        spki[16] = 0x0b;

        assert_eq!(rsa_key_from_spki(&spki), None);
    }

    #[test]
    fn der_reader_handles_long_form_lengths() {
        let mut input = vec![0x04, 0x81, 0x80];
        input.extend(std::iter::repeat(7u8).take(0x80));
        input.push(0xff);

        let (tag, contents, rest) = der_element(&input).unwrap();
        assert_eq!(tag, 0x04);
        assert_eq!(contents.len(), 0x80);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn transaction_statuses_map_to_states() {
        assert_eq!(state_for("Paid"), PaymentState::Paid);
        assert_eq!(state_for("Declined"), PaymentState::Failed);
        assert_eq!(state_for("Pending"), PaymentState::Pending);
    }
}

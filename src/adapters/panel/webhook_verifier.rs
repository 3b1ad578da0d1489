//! Panel webhook verification.
//!
//! The panel signs the whole raw body: `X-Remnawave-Signature` is the hex
//! HMAC-SHA256 of the body under the shared webhook secret.

use axum::http::StatusCode;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::subscription::PanelEnvelope;

pub const SIGNATURE_HEADER: &str = "x-remnawave-signature";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PanelWebhookError {
    #[error("Panel webhook secret not configured")]
    NotConfigured,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl PanelWebhookError {
    /// 5xx only where the panel should redeliver.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PanelWebhookError::NotConfigured | PanelWebhookError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PanelWebhookError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PanelWebhookError::EmptyPayload | PanelWebhookError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            PanelWebhookError::MissingSignature | PanelWebhookError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status_code().is_server_error()
    }
}

pub struct PanelWebhookVerifier {
    secret: Option<SecretString>,
    max_body_bytes: usize,
}

impl PanelWebhookVerifier {
    pub fn new(secret: Option<SecretString>, max_body_bytes: usize) -> Self {
        Self {
            secret: secret.filter(|s| !s.expose_secret().is_empty()),
            max_body_bytes,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Checks size, signature and envelope shape, in that order.
    ///
    /// # Errors
    ///
    /// The first check that fails; see [`PanelWebhookError::status_code`].
    pub fn verify_and_parse(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PanelEnvelope, PanelWebhookError> {
        let secret = self.secret.as_ref().ok_or(PanelWebhookError::NotConfigured)?;

        if body.len() > self.max_body_bytes {
            return Err(PanelWebhookError::PayloadTooLarge {
                size: body.len(),
                max: self.max_body_bytes,
            });
        }
        if body.is_empty() {
            return Err(PanelWebhookError::EmptyPayload);
        }

        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(PanelWebhookError::MissingSignature)?;
        let provided = hex::decode(signature).map_err(|_| PanelWebhookError::InvalidSignature)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| PanelWebhookError::NotConfigured)?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if !bool::from(expected.as_slice().ct_eq(&provided)) {
            return Err(PanelWebhookError::InvalidSignature);
        }

        let envelope: PanelEnvelope = serde_json::from_slice(body)
            .map_err(|e| PanelWebhookError::InvalidPayload(e.to_string()))?;
        if envelope.scope.as_deref().map_or(true, str::is_empty) {
            return Err(PanelWebhookError::InvalidPayload("missing scope".to_string()));
        }
        if envelope.event.as_deref().map_or(true, str::is_empty) {
            return Err(PanelWebhookError::InvalidPayload("missing event".to_string()));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "panel-secret";

    fn verifier() -> PanelWebhookVerifier {
        PanelWebhookVerifier::new(Some(SecretString::new(SECRET.to_string())), 1024)
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    // ══════════════════════════════════════════════════════════════
    // Accepted payloads
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn signed_envelope_is_parsed() {
        let body = br#"{"scope":"user","event":"user.disabled","data":{"uuid":"x"}}"#;

        let envelope = verifier().verify_and_parse(body, Some(&sign(body))).unwrap();

        assert_eq!(envelope.scope.as_deref(), Some("user"));
        assert_eq!(envelope.event.as_deref(), Some("user.disabled"));
    }

    #[test]
    fn uppercase_hex_signature_is_accepted() {
        let body = br#"{"scope":"node","event":"node.offline","data":{}}"#;
        let signature = sign(body).to_uppercase();

        assert!(verifier().verify_and_parse(body, Some(&signature)).is_ok());
    }

    // ══════════════════════════════════════════════════════════════
    // Rejections
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn unset_secret_is_unavailable() {
        let verifier = PanelWebhookVerifier::new(Some(SecretString::new(String::new())), 1024);
        let err = verifier.verify_and_parse(b"{}", Some("00")).unwrap_err();
        assert_eq!(err, PanelWebhookError::NotConfigured);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn oversized_body_is_rejected_before_signature_check() {
        let body = vec![b'a'; 2048];
        let err = verifier().verify_and_parse(&body, None).unwrap_err();
        assert_eq!(err, PanelWebhookError::PayloadTooLarge { size: 2048, max: 1024 });
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn empty_body_is_bad_request() {
        let err = verifier().verify_and_parse(b"", Some("00")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_and_wrong_signatures_are_unauthorized() {
        let body = br#"{"scope":"user","event":"user.enabled","data":{}}"#;

        let missing = verifier().verify_and_parse(body, None).unwrap_err();
        let wrong = verifier().verify_and_parse(body, Some(&"00".repeat(32))).unwrap_err();
        let not_hex = verifier().verify_and_parse(body, Some("zz")).unwrap_err();

        assert_eq!(missing, PanelWebhookError::MissingSignature);
        assert_eq!(wrong, PanelWebhookError::InvalidSignature);
        assert_eq!(not_hex, PanelWebhookError::InvalidSignature);
        assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn signed_but_invalid_json_is_bad_request() {
        let body = b"not json";
        let err = verifier().verify_and_parse(body, Some(&sign(body))).unwrap_err();
        assert!(matches!(err, PanelWebhookError::InvalidPayload(_)));
    }

    #[test]
    fn envelope_without_event_is_bad_request() {
        let body = br#"{"scope":"user","data":{}}"#;
        let err = verifier().verify_and_parse(body, Some(&sign(body))).unwrap_err();
        assert_eq!(err, PanelWebhookError::InvalidPayload("missing event".to_string()));
    }

    #[test]
    fn only_unavailability_is_retryable() {
        assert!(PanelWebhookError::StoreUnavailable("db".into()).is_retryable());
        assert!(!PanelWebhookError::InvalidSignature.is_retryable());
    }
}

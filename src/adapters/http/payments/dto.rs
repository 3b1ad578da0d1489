//! HTTP DTOs for payment endpoints.

use serde::{Deserialize, Serialize};

use crate::application::handlers::settlement::CreatePaymentIntentResult;
use crate::domain::foundation::{Currency, OrderId, Timestamp};
use crate::domain::settlement::Processor;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a balance top-up.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    /// Processor slug, e.g. `freekassa`.
    pub processor: Processor,
    pub amount_minor: i64,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Needed by processors that send receipts.
    #[serde(default)]
    pub email: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentResponse {
    pub order_id: OrderId,
    pub checkout_url: String,
    pub expires_at: Timestamp,
}

impl From<CreatePaymentIntentResult> for CreatePaymentResponse {
    fn from(result: CreatePaymentIntentResult) -> Self {
        Self {
            order_id: result.order_id,
            checkout_url: result.checkout_url,
            expires_at: result.expires_at,
        }
    }
}

/// Error body shared by the JSON endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

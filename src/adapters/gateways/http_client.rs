//! Shared outbound HTTP client for processor APIs.
//!
//! Every processor call goes through [`GatewayHttpClient::send`], which
//! applies the per-processor timeout and maps transport outcomes onto
//! [`GatewayError`]:
//!
//! | Outcome | Error |
//! |---------|-------|
//! | deadline exceeded | `Timeout` |
//! | connection failure, 5xx | `Network` (retryable) |
//! | 429 with `Retry-After` | bounded retry, then `Network` |
//! | other 4xx | `Provider` |
//! | unparseable body | `Malformed` |

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::ports::GatewayError;

const DEFAULT_RATE_LIMIT_RETRIES: u32 = 2;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);
const ERROR_BODY_PREVIEW: usize = 256;

/// Thin wrapper over [`reqwest::Client`] bound to one processor's base URL.
#[derive(Debug, Clone)]
pub struct GatewayHttpClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    rate_limit_retries: u32,
    label: &'static str,
}

impl GatewayHttpClient {
    pub fn new(label: &'static str, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            label,
        }
    }

    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.timeout)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).timeout(self.timeout)
    }

    /// Sends a request and decodes a JSON body.
    ///
    /// `build` is called once per attempt so a rate-limited request can be
    /// rebuilt and resent.
    pub async fn send<T, F>(&self, build: F) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn(&Self) -> RequestBuilder,
    {
        let body = self.send_raw(build).await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Sends a request and returns the body text of a 2xx response.
    pub async fn send_raw<F>(&self, build: F) -> Result<String, GatewayError>
    where
        F: Fn(&Self) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let response = build(self).send().await.map_err(transport_error)?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = retry_after(response.headers());
                if attempt < self.rate_limit_retries {
                    attempt += 1;
                    warn!(
                        processor = self.label,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Processor rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GatewayError::Network(format!(
                    "{} rate limit retries exhausted",
                    self.label
                )));
            }

            let text = response.text().await.map_err(transport_error)?;
            if status.is_server_error() {
                return Err(GatewayError::Network(format!("{} returned {}", self.label, status)));
            }
            if !status.is_success() {
                warn!(processor = self.label, %status, body = %preview(&text), "Processor rejected request");
                return Err(GatewayError::Provider(format!("{} returned {}", self.label, status)));
            }
            return Ok(text);
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_decode() {
        GatewayError::Malformed(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

/// `Retry-After` in seconds, capped. Missing or HTTP-date values wait one second.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs(1))
        .min(MAX_RETRY_AFTER)
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn url_joins_without_double_slashes() {
        let client = GatewayHttpClient::new("test", "https://api.example/v1/", Duration::from_secs(1));
        assert_eq!(client.url("/orders/create"), "https://api.example/v1/orders/create");
        assert_eq!(client.url("orders"), "https://api.example/v1/orders");
    }

    #[test]
    fn retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("45"));
        assert_eq!(retry_after(&headers), MAX_RETRY_AFTER);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_defaults_when_unparseable() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), Duration::from_secs(1));
        assert_eq!(retry_after(&HeaderMap::new()), Duration::from_secs(1));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "ж".repeat(400);
        assert_eq!(preview(&long).chars().count(), ERROR_BODY_PREVIEW);
        assert_eq!(preview("short"), "short");
    }
}

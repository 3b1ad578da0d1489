//! Signature primitives shared by processor adapters.

use hmac::{Hmac, Mac};
use http::HeaderMap;
use md5::{Digest, Md5};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::IpAddr;
use subtle::ConstantTimeEq;

use crate::ports::VerificationError;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 tag.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length; the error arm is unreachable.
    HmacSha256::new_from_slice(key)
        .map(|mut mac| {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        })
        .unwrap_or_default()
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Lowercase hex MD5.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Constant-time equality. Different lengths compare unequal.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    !expected.is_empty() && expected.ct_eq(provided).into()
}

/// Header value as trimmed text, if present and printable.
pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Decodes an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Required form field.
pub fn field<'a>(form: &'a HashMap<String, String>, name: &str) -> Result<&'a str, VerificationError> {
    form.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| VerificationError::Malformed(format!("missing field {}", name)))
}

/// Source addresses a processor delivers webhooks from. Empty allows any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowList {
    allowed: Vec<IpAddr>,
}

impl IpAllowList {
    pub fn new(allowed: Vec<IpAddr>) -> Self {
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn check(&self, source: Option<IpAddr>) -> Result<(), VerificationError> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        match source {
            Some(ip) if self.allowed.contains(&ip) => Ok(()),
            _ => Err(VerificationError::UntrustedSource),
        }
    }
}

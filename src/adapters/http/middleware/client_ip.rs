//! Source address resolution for processor callbacks.
//!
//! Behind a reverse proxy the TCP peer is the proxy itself, so the
//! forwarding headers are honoured only when the deployment says a trusted
//! proxy sets them.

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Client address of a request.
///
/// With `trust_proxy_headers`, the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`; otherwise, and as the fallback, the TCP peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> Option<IpAddr> {
    if trust_proxy_headers {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real_ip = headers
            .get(REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }
    peer.map(|addr| addr.ip())
}

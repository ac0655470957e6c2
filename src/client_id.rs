// Resolves the address used as the key for download cooldowns and password bans.
//
// Without proxy trust the TCP peer address is authoritative. With proxy trust
// the forwarding headers set by the reverse proxy take precedence, falling back
// to the peer address when they are missing or malformed.

use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub IpAddr);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Whether forwarding headers may be used to identify the client.
// Provided to the extractor through a request extension set on the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyTrust(pub bool);

impl ClientId {
    pub fn resolve(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<Self> {
        let forwarded = if trust_proxy {
            from_x_forwarded_for(headers).or_else(|| from_x_real_ip(headers))
        } else {
            None
        };

        forwarded.or(peer).map(ClientId)
    }
}

// "client, proxy1, proxy2": the leftmost entry is the original client.
// That entry is whatever the first hop sent, so the fronting proxy has to
// overwrite the header rather than append to it.
fn from_x_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|ip| parse_ip(ip.trim()))
}

fn from_x_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|ip| parse_ip(ip.trim()))
}

// Accepts bare addresses as well as "addr:port" / "[v6]:port" forms
fn parse_ip(s: &str) -> Option<IpAddr> {
    s.parse::<IpAddr>()
        .ok()
        .or_else(|| s.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust_proxy = parts
            .extensions
            .get::<ProxyTrust>()
            .copied()
            .unwrap_or_default()
            .0;
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        ClientId::resolve(&parts.headers, peer, trust_proxy).ok_or_else(|| {
            AppError::InternalServerError("Unable to determine client address".to_string())
        })
    }
}

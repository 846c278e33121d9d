use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

const FALLBACK_ADDRESS: &str = "127.0.0.1";

/// Address used to key rate limits for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for")
        && let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map_or_else(|| FALLBACK_ADDRESS.to_string(), |addr| addr.ip().to_string())
}

impl<S: Send + Sync> FromRequestParts<S> for ClientAddress {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddress(client_address(&parts.headers, peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "10.0.0.9"),
        ]);
        assert_eq!(client_address(&map, None), "203.0.113.7");
    }

    #[test]
    fn real_ip_when_no_forwarded_for() {
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_address(&map, None), "198.51.100.2");
    }

    #[test]
    fn peer_then_loopback() {
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        assert_eq!(client_address(&HeaderMap::new(), Some(peer)), "192.0.2.1");
        assert_eq!(client_address(&HeaderMap::new(), None), "127.0.0.1");
    }

    #[test]
    fn blank_forwarded_for_is_ignored() {
        let map = headers(&[("x-forwarded-for", " , ")]);
        assert_eq!(client_address(&map, None), "127.0.0.1");
    }
}

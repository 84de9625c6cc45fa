//! Connection metadata and overlay-network identity assertions
//!
//! The overlay proxy (Tailscale Serve) terminates the peer connection, then
//! forwards it to the gateway over loopback with `x-forwarded-*` headers and
//! headers naming the authenticated peer. The authorizer only consults an
//! [`IdentityProxy`] for connections that look like they came through that
//! proxy.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::constants::{
    HEADER_FORWARDED_FOR, HEADER_FORWARDED_HOST, HEADER_FORWARDED_PROTO,
    HEADER_TAILSCALE_USER_LOGIN, HEADER_TAILSCALE_USER_NAME,
};

/// Metadata observed for one inbound connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub remote_addr: Option<IpAddr>,
    /// Header names are stored lowercased
    headers: HashMap<String, String>,
}

impl ConnectionInfo {
    #[must_use]
    pub fn new(remote_addr: Option<IpAddr>) -> Self {
        Self {
            remote_addr,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Trimmed, non-empty header value
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    #[cfg(feature = "http")]
    #[must_use]
    pub fn from_http(remote_addr: Option<IpAddr>, headers: &axum::http::HeaderMap) -> Self {
        let mut info = Self::new(remote_addr);
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                info.insert_header(name.as_str(), value);
            }
        }
        info
    }
}

/// Identity asserted by the overlay proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyIdentity {
    pub login: String,
    pub name: Option<String>,
}

/// Resolves a trusted proxy's asserted identity for a connection.
///
/// Results are trusted as-is; only wire up an implementation when the
/// deployment really sits behind the overlay proxy.
pub trait IdentityProxy: Send + Sync {
    fn lookup(&self, conn: &ConnectionInfo) -> Option<ProxyIdentity>;
}

impl<F> IdentityProxy for F
where
    F: Fn(&ConnectionInfo) -> Option<ProxyIdentity> + Send + Sync,
{
    fn lookup(&self, conn: &ConnectionInfo) -> Option<ProxyIdentity> {
        self(conn)
    }
}

/// Reads the login and display name headers Tailscale Serve attaches
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIdentityProxy;

impl IdentityProxy for HeaderIdentityProxy {
    fn lookup(&self, conn: &ConnectionInfo) -> Option<ProxyIdentity> {
        let login = conn.header(HEADER_TAILSCALE_USER_LOGIN)?;
        Some(ProxyIdentity {
            login: login.to_string(),
            name: conn.header(HEADER_TAILSCALE_USER_NAME).map(str::to_string),
        })
    }
}

/// Loopback peer carrying the overlay proxy's forwarding headers, with a
/// forwarded host under `host_suffix`.
pub fn is_overlay_proxy_request(conn: &ConnectionInfo, host_suffix: &str) -> bool {
    let Some(ip) = conn.remote_addr else {
        return false;
    };
    if !is_loopback_addr(ip) {
        return false;
    }

    let has_forwarding = conn.header(HEADER_FORWARDED_FOR).is_some()
        && conn.header(HEADER_FORWARDED_PROTO).is_some();
    let Some(host) = conn.header(HEADER_FORWARDED_HOST) else {
        return false;
    };

    has_forwarding && host_name(host).ends_with(host_suffix)
}

/// Check if an IP address is loopback, including IPv4-mapped IPv6.
pub fn is_loopback_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Strip the port (and IPv6 brackets) from a host header value
fn host_name(host: &str) -> String {
    let trimmed = host.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_lowercase();
    }
    trimmed
        .split(':')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxied(remote: &str) -> ConnectionInfo {
        ConnectionInfo::new(Some(remote.parse().unwrap()))
            .with_header("X-Forwarded-For", "100.100.50.25")
            .with_header("x-forwarded-proto", "https")
            .with_header("x-forwarded-host", "gateway.tail1234.ts.net")
    }

    #[test]
    fn test_headers_case_insensitive() {
        let conn = ConnectionInfo::new(None).with_header("Tailscale-User-Login", " alice ");
        assert_eq!(conn.header("tailscale-user-login"), Some("alice"));
        assert_eq!(conn.header("TAILSCALE-USER-LOGIN"), Some("alice"));
    }

    #[test]
    fn test_blank_header_is_absent() {
        let conn = ConnectionInfo::new(None).with_header("x-forwarded-for", "   ");
        assert!(conn.header("x-forwarded-for").is_none());
    }

    #[test]
    fn test_overlay_request_from_loopback() {
        assert!(is_overlay_proxy_request(&proxied("127.0.0.1"), ".ts.net"));
        assert!(is_overlay_proxy_request(&proxied("::1"), ".ts.net"));
        assert!(is_overlay_proxy_request(&proxied("::ffff:127.0.0.1"), ".ts.net"));
    }

    #[test]
    fn test_overlay_request_rejects_external_peer() {
        assert!(!is_overlay_proxy_request(&proxied("8.8.8.8"), ".ts.net"));
        assert!(!is_overlay_proxy_request(&proxied("100.100.50.25"), ".ts.net"));
    }

    #[test]
    fn test_overlay_request_requires_forwarding_headers() {
        let conn = ConnectionInfo::new(Some("127.0.0.1".parse().unwrap()))
            .with_header("x-forwarded-host", "gateway.tail1234.ts.net");
        assert!(!is_overlay_proxy_request(&conn, ".ts.net"));

        let conn = ConnectionInfo::new(None)
            .with_header("x-forwarded-for", "100.100.50.25")
            .with_header("x-forwarded-proto", "https")
            .with_header("x-forwarded-host", "gateway.tail1234.ts.net");
        assert!(!is_overlay_proxy_request(&conn, ".ts.net"));
    }

    #[test]
    fn test_overlay_request_checks_host_suffix() {
        let conn = proxied("127.0.0.1").with_header("x-forwarded-host", "gateway.example.com");
        assert!(!is_overlay_proxy_request(&conn, ".ts.net"));

        let conn = proxied("127.0.0.1").with_header("x-forwarded-host", "GATEWAY.tail1.TS.NET:443");
        assert!(is_overlay_proxy_request(&conn, ".ts.net"));
    }

    #[test]
    fn test_header_identity_proxy() {
        let conn = proxied("127.0.0.1")
            .with_header("tailscale-user-login", "alice@example.com")
            .with_header("tailscale-user-name", "Alice");
        let identity = HeaderIdentityProxy.lookup(&conn).unwrap();
        assert_eq!(identity.login, "alice@example.com");
        assert_eq!(identity.name.as_deref(), Some("Alice"));

        assert!(HeaderIdentityProxy.lookup(&proxied("127.0.0.1")).is_none());
    }

    #[test]
    fn test_closure_identity_proxy() {
        let lookup = |conn: &ConnectionInfo| {
            conn.header("x-forwarded-for").map(|ip| ProxyIdentity {
                login: format!("peer-{ip}"),
                name: None,
            })
        };
        let identity = lookup.lookup(&proxied("127.0.0.1")).unwrap();
        assert_eq!(identity.login, "peer-100.100.50.25");
    }

    #[test]
    fn test_host_name_parsing() {
        assert_eq!(host_name("example.ts.net:8443"), "example.ts.net");
        assert_eq!(host_name("[::1]:8080"), "::1");
        assert_eq!(host_name("Example.TS.net"), "example.ts.net");
    }
}

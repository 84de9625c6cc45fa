//! Connection authorization middleware for HTTP transport
//!
//! This module requires the `http` feature for axum integration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

use super::authorize::{AuthResult, Authorizer, ConnectAuth};
use super::proxy::ConnectionInfo;
use crate::constants::{HEADER_GATEWAY_PASSWORD, HEADER_OIDC_TOKEN};

/// Runs the [`Authorizer`] for every request.
///
/// Accepted requests carry the [`AuthResult`] in their extensions. Rejected
/// requests get a bare 401; the reason code only goes to the log.
#[allow(clippy::future_not_send)]
pub async fn connect_auth_middleware(
    State(authorizer): State<Arc<Authorizer>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let presented = connect_auth_from_headers(request.headers());
    let conn = ConnectionInfo::from_http(remote_addr, request.headers());

    let result = authorizer.authorize(&presented, &conn).await;
    if !result.is_ok() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(result);
    Ok(next.run(request).await)
}

/// Collect presented credentials from request headers
pub fn connect_auth_from_headers(headers: &HeaderMap) -> ConnectAuth {
    ConnectAuth {
        token: bearer_token(headers),
        password: header_str(headers, HEADER_GATEWAY_PASSWORD),
        oidc_token: header_str(headers, HEADER_OIDC_TOKEN),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

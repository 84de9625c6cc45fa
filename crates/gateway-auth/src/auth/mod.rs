//! Connection authentication
//!
//! Provides the connection [`Authorizer`] and the OIDC assertion verifier it
//! consults.
//!
//! # Features
//!
//! - Shared token / password modes with constant-time comparison
//! - OIDC bearer assertions validated via `jsonwebtoken` against a JWKS that
//!   is discovered from the issuer and refreshed on key rotation
//! - Email domain and address allowlists
//! - Identity assertions from a trusted overlay-network proxy
//! - axum middleware (feature `http`)
//!
//! # Precedence
//!
//! An overlay identity wins first, then a valid OIDC assertion, then the
//! configured mode's credential. A failed OIDC assertion never locks out a
//! client that also presents a valid static credential.

mod authorize;
mod claims;
mod config;
mod error;
mod jwks;
#[cfg(feature = "http")]
mod middleware;
mod oidc;
mod proxy;

pub use authorize::{
    AuthContext, AuthMethod, AuthResult, Authorizer, ConnectAuth, authorize, timing_safe_eq,
};
pub use claims::VerifiedAssertion;
pub use config::{AuthConfig, AuthMode, OidcVerifierConfig};
pub use error::{AuthError, RejectReason, Result};
pub use jwks::{Jwk, JwkSet, JwksCache, JwksRefreshTask};
#[cfg(feature = "http")]
pub use middleware::{connect_auth_from_headers, connect_auth_middleware};
pub use oidc::{AssertionVerifier, OidcVerifier};
pub use proxy::{
    ConnectionInfo, HeaderIdentityProxy, IdentityProxy, ProxyIdentity, is_loopback_addr,
    is_overlay_proxy_request,
};

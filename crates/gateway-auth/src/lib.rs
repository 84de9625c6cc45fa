//! Connection authorization and downstream token brokering
//!
//! - [`Authorizer`] decides whether a connecting client may use the gateway,
//!   by overlay identity, OIDC assertion or shared secret
//! - [`OidcVerifier`] validates bearer assertions against a discovered JWKS
//! - [`TokenBroker`] exchanges a user's refresh credential for downstream
//!   access tokens and caches them

pub mod auth;
pub mod broker;
pub mod config;
mod constants;
mod error;
pub mod observability;
#[cfg(test)]
mod test_support;

pub use auth::{
    AssertionVerifier, AuthConfig, AuthError, AuthMethod, AuthMode, AuthResult, Authorizer,
    ConnectAuth, ConnectionInfo, IdentityProxy, OidcVerifier, OidcVerifierConfig, RejectReason,
    VerifiedAssertion,
};
pub use broker::{AccessToken, BrokerConfig, BrokerError, TokenBroker};
pub use config::{Config, ConfigBuilder, TelemetryConfig};
pub use error::{Error, Result};

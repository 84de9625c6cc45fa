//! Connection authorization
//!
//! Decides whether an inbound connection is authenticated. Checks run in a
//! fixed order and the first success wins:
//!
//! 1. overlay-proxy identity (when enabled and the request came through it)
//! 2. OIDC assertion (whenever one is presented and a verifier exists)
//! 3. the configured mode's static credential
//!
//! A failed OIDC check never rejects on its own; the mode check still runs
//! and its reason is the one reported.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::config::{AuthConfig, AuthMode};
use super::error::RejectReason;
use super::oidc::AssertionVerifier;
use super::proxy::{ConnectionInfo, IdentityProxy, is_overlay_proxy_request};

/// Credentials presented with one connection attempt
#[derive(Clone, Default)]
pub struct ConnectAuth {
    pub token: Option<String>,
    pub password: Option<String>,
    pub oidc_token: Option<String>,
}

impl fmt::Debug for ConnectAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectAuth")
            .field("has_token", &self.token.is_some())
            .field("has_password", &self.password.is_some())
            .field("has_oidc_token", &self.oidc_token.is_some())
            .finish()
    }
}

impl ConnectAuth {
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_oidc_token(mut self, token: impl Into<String>) -> Self {
        self.oidc_token = Some(token.into());
        self
    }
}

/// How an accepted connection authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Token,
    Password,
    Oidc,
    Tailscale,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Password => "password",
            Self::Oidc => "oidc",
            Self::Tailscale => "tailscale",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Accepted {
        method: AuthMethod,
        user: Option<String>,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl AuthResult {
    const fn accepted(method: AuthMethod, user: Option<String>) -> Self {
        Self::Accepted { method, user }
    }

    const fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub const fn method(&self) -> Option<AuthMethod> {
        match self {
            Self::Accepted { method, .. } => Some(*method),
            Self::Rejected { .. } => None,
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Accepted { user, .. } => user.as_deref(),
            Self::Rejected { .. } => None,
        }
    }

    #[must_use]
    pub const fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { reason } => Some(*reason),
        }
    }
}

/// Flat `{ok, method, user, reason}` object
impl Serialize for AuthResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            ok: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            method: Option<AuthMethod>,
            #[serde(skip_serializing_if = "Option::is_none")]
            user: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<RejectReason>,
        }

        Wire {
            ok: self.is_ok(),
            method: self.method(),
            user: self.user(),
            reason: self.reason(),
        }
        .serialize(serializer)
    }
}

/// Per-attempt collaborators
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub connection: &'a ConnectionInfo,
    pub identity_proxy: Option<&'a dyn IdentityProxy>,
    pub verifier: Option<&'a dyn AssertionVerifier>,
}

impl<'a> AuthContext<'a> {
    #[must_use]
    pub const fn new(connection: &'a ConnectionInfo) -> Self {
        Self {
            connection,
            identity_proxy: None,
            verifier: None,
        }
    }

    #[must_use]
    pub const fn with_identity_proxy(mut self, proxy: &'a dyn IdentityProxy) -> Self {
        self.identity_proxy = Some(proxy);
        self
    }

    #[must_use]
    pub const fn with_verifier(mut self, verifier: &'a dyn AssertionVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

/// Timing-safe string equality.
///
/// Both sides are hashed to fixed-length digests first, so neither the
/// content nor the length of the expected secret shows in the timing.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    bool::from(a.as_slice().ct_eq(b.as_slice()))
}

/// Authorize one connection attempt.
///
/// Expected rejections are returned as [`AuthResult::Rejected`]; this never
/// fails otherwise.
pub async fn authorize(
    config: &AuthConfig,
    presented: &ConnectAuth,
    ctx: &AuthContext<'_>,
) -> AuthResult {
    if config.allow_tailscale_identity
        && let Some(proxy) = ctx.identity_proxy
        && is_overlay_proxy_request(ctx.connection, &config.tailscale_host_suffix)
        && let Some(identity) = proxy.lookup(ctx.connection)
    {
        let login = identity.login.trim();
        if !login.is_empty() {
            return AuthResult::accepted(AuthMethod::Tailscale, Some(login.to_string()));
        }
    }

    let mut oidc_failure = None;
    if let Some(verifier) = ctx.verifier
        && let Some(assertion) = presented.oidc_token.as_deref()
    {
        match verifier.verify(assertion).await {
            Ok(verified) => return AuthResult::accepted(AuthMethod::Oidc, Some(verified.user)),
            Err(reason) => {
                tracing::debug!(reason = reason.as_str(), "OIDC check failed, trying mode check");
                oidc_failure = Some(reason);
            }
        }
    }

    match config.mode {
        AuthMode::Token => check_secret(
            config.token.as_deref(),
            presented.token.as_deref(),
            AuthMethod::Token,
            [
                RejectReason::TokenMissingConfig,
                RejectReason::TokenMissing,
                RejectReason::TokenMismatch,
            ],
        ),
        AuthMode::Password => check_secret(
            config.password.as_deref(),
            presented.password.as_deref(),
            AuthMethod::Password,
            [
                RejectReason::PasswordMissingConfig,
                RejectReason::PasswordMissing,
                RejectReason::PasswordMismatch,
            ],
        ),
        AuthMode::Oidc => {
            let reason = if presented.oidc_token.is_none() {
                RejectReason::OidcTokenMissing
            } else {
                oidc_failure.unwrap_or(RejectReason::OidcMissingConfig)
            };
            AuthResult::rejected(reason)
        }
    }
}

/// `reasons` is `[missing_config, missing, mismatch]`
fn check_secret(
    expected: Option<&str>,
    provided: Option<&str>,
    method: AuthMethod,
    reasons: [RejectReason; 3],
) -> AuthResult {
    let [missing_config, missing, mismatch] = reasons;
    let Some(expected) = expected else {
        return AuthResult::rejected(missing_config);
    };
    let Some(provided) = provided else {
        return AuthResult::rejected(missing);
    };
    if timing_safe_eq(expected, provided) {
        AuthResult::accepted(method, None)
    } else {
        AuthResult::rejected(mismatch)
    }
}

/// Process-wide authorizer holding the deployment policy and collaborators
#[derive(Clone)]
pub struct Authorizer {
    config: Arc<AuthConfig>,
    verifier: Option<Arc<dyn AssertionVerifier>>,
    identity_proxy: Option<Arc<dyn IdentityProxy>>,
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("config", &self.config)
            .field("has_verifier", &self.verifier.is_some())
            .field("has_identity_proxy", &self.identity_proxy.is_some())
            .finish()
    }
}

impl Authorizer {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
            verifier: None,
            identity_proxy: None,
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn AssertionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_identity_proxy(mut self, proxy: Arc<dyn IdentityProxy>) -> Self {
        self.identity_proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Authorize and log the outcome. Credentials never reach the log.
    pub async fn authorize(&self, presented: &ConnectAuth, conn: &ConnectionInfo) -> AuthResult {
        let ctx = AuthContext {
            connection: conn,
            identity_proxy: self.identity_proxy.as_deref(),
            verifier: self.verifier.as_deref(),
        };
        let result = authorize(&self.config, presented, &ctx).await;

        match &result {
            AuthResult::Accepted { method, user } => {
                tracing::debug!(
                    method = method.as_str(),
                    user = user.as_deref().unwrap_or("-"),
                    "Connection accepted"
                );
                #[cfg(feature = "metrics")]
                {
                    crate::observability::record_auth_accepted(method.as_str());
                }
            }
            AuthResult::Rejected { reason } => {
                if reason.is_config_fault() {
                    tracing::error!(
                        reason = reason.as_str(),
                        mode = self.config.mode.as_str(),
                        "Connection rejected: gateway auth is not fully configured"
                    );
                } else {
                    tracing::warn!(
                        reason = reason.as_str(),
                        remote = ?conn.remote_addr,
                        "Connection rejected"
                    );
                }
                #[cfg(feature = "metrics")]
                {
                    crate::observability::record_auth_rejected(reason.as_str());
                }
            }
        }

        result
    }
}

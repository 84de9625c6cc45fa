//! Authentication configuration types

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use super::error::{AuthError, Result};
use crate::constants::{DEFAULT_TAILSCALE_HOST_SUFFIX, DEFAULT_USER_CLAIM, SHORT_HTTP_TIMEOUT};

/// Authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Shared gateway token
    #[default]
    Token,
    /// Shared gateway password
    Password,
    /// OIDC bearer assertion only
    Oidc,
}

impl AuthMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Password => "password",
            Self::Oidc => "oidc",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "password" => Ok(Self::Password),
            "oidc" => Ok(Self::Oidc),
            other => Err(AuthError::Config(format!("unknown auth mode: {other}"))),
        }
    }
}

/// OIDC verifier configuration
#[derive(Debug, Clone)]
pub struct OidcVerifierConfig {
    /// Issuer without trailing slash, compared against `iss`
    issuer: String,
    /// Required `aud` value
    pub audience: String,
    /// Key set location (discovered from the issuer when absent)
    pub jwks_uri: Option<Url>,
    /// Claim holding the user identity
    pub user_claim: String,
    /// Allowed email domains (`@domain` suffix match)
    pub allowed_domains: Option<HashSet<String>>,
    /// Allowed emails, stored lowercased
    allowed_emails: Option<HashSet<String>>,
    /// Clock skew tolerance for exp/nbf validation
    pub clock_skew: Duration,
    /// Key set is refetched once older than this
    pub jwks_cache_ttl: Duration,
    /// Minimum spacing between refreshes forced by unknown key ids
    pub jwks_refresh_cooldown: Duration,
    /// Timeout for discovery and key set requests
    pub http_timeout: Duration,
}

impl OidcVerifierConfig {
    pub fn new(issuer: &str, audience: impl Into<String>) -> Result<Self> {
        let issuer = normalize_issuer(issuer)?;
        Ok(Self {
            issuer,
            audience: audience.into(),
            jwks_uri: None,
            user_claim: DEFAULT_USER_CLAIM.to_string(),
            allowed_domains: None,
            allowed_emails: None,
            clock_skew: Duration::ZERO,
            jwks_cache_ttl: Duration::from_secs(3600),
            jwks_refresh_cooldown: Duration::from_secs(30),
            http_timeout: SHORT_HTTP_TIMEOUT,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer)
    }

    #[must_use]
    pub fn with_jwks_uri(mut self, uri: Url) -> Self {
        self.jwks_uri = Some(uri);
        self
    }

    #[must_use]
    pub fn with_user_claim(mut self, claim: impl Into<String>) -> Self {
        self.user_claim = claim.into();
        self
    }

    #[must_use]
    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_allowed_emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_emails = Some(
            emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
        );
        self
    }

    #[must_use]
    pub const fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    #[must_use]
    pub const fn with_jwks_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.jwks_refresh_cooldown = cooldown;
        self
    }

    #[must_use]
    pub const fn allowed_emails(&self) -> Option<&HashSet<String>> {
        self.allowed_emails.as_ref()
    }
}

fn normalize_issuer(issuer: &str) -> Result<String> {
    let trimmed = issuer.trim().trim_end_matches('/');
    Url::parse(trimmed).map_err(|e| AuthError::Config(format!("invalid issuer URL: {e}")))?;
    Ok(trimmed.to_string())
}

/// Per-deployment connection policy
#[derive(Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
    pub password: Option<String>,
    /// Accept identities asserted by the overlay network proxy
    pub allow_tailscale_identity: bool,
    /// Forwarded host suffix the overlay proxy uses
    pub tailscale_host_suffix: String,
    pub oidc: Option<OidcVerifierConfig>,
}

// Secrets never reach logs
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("has_token", &self.token.is_some())
            .field("has_password", &self.password.is_some())
            .field("allow_tailscale_identity", &self.allow_tailscale_identity)
            .field("tailscale_host_suffix", &self.tailscale_host_suffix)
            .field("oidc", &self.oidc)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: None,
            password: None,
            allow_tailscale_identity: false,
            tailscale_host_suffix: DEFAULT_TAILSCALE_HOST_SUFFIX.to_string(),
            oidc: None,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Token,
            token: Some(token.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Password,
            password: Some(password.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn oidc(config: OidcVerifierConfig) -> Self {
        Self {
            mode: AuthMode::Oidc,
            oidc: Some(config),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_tailscale_identity(mut self, allow: bool) -> Self {
        self.allow_tailscale_identity = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!("token".parse::<AuthMode>().unwrap(), AuthMode::Token);
        assert_eq!("PASSWORD".parse::<AuthMode>().unwrap(), AuthMode::Password);
        assert_eq!(" oidc ".parse::<AuthMode>().unwrap(), AuthMode::Oidc);
        assert!(matches!(
            "basic".parse::<AuthMode>(),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_issuer_trailing_slash_normalized() {
        let config = OidcVerifierConfig::new("https://auth.example.com/", "api").unwrap();
        assert_eq!(config.issuer(), "https://auth.example.com");
        assert_eq!(
            config.discovery_url(),
            "https://auth.example.com/.well-known/openid-configuration"
        );

        let config = OidcVerifierConfig::new("https://auth.example.com/tenant//", "api").unwrap();
        assert_eq!(config.issuer(), "https://auth.example.com/tenant");
    }

    #[test]
    fn test_invalid_issuer_rejected() {
        let result = OidcVerifierConfig::new("not a url", "api");
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_oidc_config_defaults() {
        let config = OidcVerifierConfig::new("https://auth.example.com", "api").unwrap();
        assert_eq!(config.user_claim, "sub");
        assert!(config.jwks_uri.is_none());
        assert!(config.allowed_domains.is_none());
        assert!(config.allowed_emails().is_none());
        assert_eq!(config.clock_skew, Duration::ZERO);
        assert_eq!(config.http_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_allowed_emails_lowercased() {
        let config = OidcVerifierConfig::new("https://auth.example.com", "api")
            .unwrap()
            .with_allowed_emails(["Alice@Example.COM", " bob@example.com "]);
        let emails = config.allowed_emails().unwrap();
        assert!(emails.contains("alice@example.com"));
        assert!(emails.contains("bob@example.com"));
    }

    #[test]
    fn test_auth_config_debug_redacts_secrets() {
        let config = AuthConfig::token("super-secret-token");
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret-token"));
        assert!(debug_str.contains("has_token: true"));

        let config = AuthConfig::password("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert_eq!(config.mode, AuthMode::Token);
        assert!(config.token.is_none());
        assert!(!config.allow_tailscale_identity);
        assert_eq!(config.tailscale_host_suffix, ".ts.net");
    }
}

//! Authentication error types

use serde::Serialize;
use thiserror::Error;

/// Faults raised while constructing or refreshing the verifier.
///
/// These are operator or environment problems. Credential problems are
/// reported as [`RejectReason`] instead.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("JWKS fetch failed: {0}")]
    JwksFetch(#[from] reqwest::Error),

    #[error("JWKS parse failed: {0}")]
    JwksParse(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no matching key for algorithm")]
    NoMatchingKey,

    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    #[must_use]
    pub const fn is_key_lookup(&self) -> bool {
        matches!(self, Self::KeyNotFound(_) | Self::NoMatchingKey)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Why a connection attempt was rejected.
///
/// Serialized as stable snake_case codes. The codes go to logs only; remote
/// peers get a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("gateway token not configured")]
    TokenMissingConfig,
    #[error("token missing")]
    TokenMissing,
    #[error("token mismatch")]
    TokenMismatch,
    #[error("gateway password not configured")]
    PasswordMissingConfig,
    #[error("password missing")]
    PasswordMissing,
    #[error("password mismatch")]
    PasswordMismatch,
    #[error("OIDC verifier not configured")]
    OidcMissingConfig,
    #[error("OIDC token missing")]
    OidcTokenMissing,
    #[error("OIDC token invalid")]
    OidcTokenInvalid,
    #[error("OIDC token expired")]
    OidcTokenExpired,
    #[error("OIDC token signature invalid")]
    OidcSignatureInvalid,
    #[error("OIDC user claim missing")]
    OidcUserClaimMissing,
    #[error("email domain not allowed")]
    OidcDomainNotAllowed,
    #[error("email not allowed")]
    OidcEmailNotAllowed,
}

impl RejectReason {
    /// Stable reason code, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenMissingConfig => "token_missing_config",
            Self::TokenMissing => "token_missing",
            Self::TokenMismatch => "token_mismatch",
            Self::PasswordMissingConfig => "password_missing_config",
            Self::PasswordMissing => "password_missing",
            Self::PasswordMismatch => "password_mismatch",
            Self::OidcMissingConfig => "oidc_missing_config",
            Self::OidcTokenMissing => "oidc_token_missing",
            Self::OidcTokenInvalid => "oidc_token_invalid",
            Self::OidcTokenExpired => "oidc_token_expired",
            Self::OidcSignatureInvalid => "oidc_signature_invalid",
            Self::OidcUserClaimMissing => "oidc_user_claim_missing",
            Self::OidcDomainNotAllowed => "oidc_domain_not_allowed",
            Self::OidcEmailNotAllowed => "oidc_email_not_allowed",
        }
    }

    /// Operator-caused: the deployment lacks the secret the mode requires.
    #[must_use]
    pub const fn is_config_fault(self) -> bool {
        matches!(
            self,
            Self::TokenMissingConfig | Self::PasswordMissingConfig | Self::OidcMissingConfig
        )
    }
}

impl From<jsonwebtoken::errors::Error> for RejectReason {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::OidcTokenExpired,
            ErrorKind::InvalidSignature => Self::OidcSignatureInvalid,
            _ => Self::OidcTokenInvalid,
        }
    }
}

impl From<&AuthError> for RejectReason {
    fn from(err: &AuthError) -> Self {
        if err.is_key_lookup() {
            Self::OidcSignatureInvalid
        } else {
            Self::OidcTokenInvalid
        }
    }
}

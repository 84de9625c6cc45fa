//! OIDC bearer assertion verification
//!
//! The verifier resolves the issuer's key set once at construction (through
//! OIDC discovery unless a JWKS URI is configured) and then validates
//! assertions against it: signature, issuer, audience, expiry and not-before,
//! followed by the user claim and the optional email allowlists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Validation, decode_header};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::claims::{
    VerifiedAssertion, email_allowed, email_claim, email_domain_allowed, user_claim,
};
use super::config::OidcVerifierConfig;
use super::error::{AuthError, RejectReason, Result};
use super::jwks::{JwksCache, JwksRefreshTask};

/// Something that can check a bearer assertion.
///
/// Implemented by [`OidcVerifier`]; the authorizer only depends on this trait.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, assertion: &str) -> std::result::Result<VerifiedAssertion, RejectReason>;
}

/// Validates OIDC bearer assertions against a rotating key set
pub struct OidcVerifier {
    config: OidcVerifierConfig,
    jwks: Arc<JwksCache>,
}

impl std::fmt::Debug for OidcVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcVerifier")
            .field("issuer", &self.config.issuer())
            .field("audience", &self.config.audience)
            .field("jwks", &self.jwks)
            .finish_non_exhaustive()
    }
}

impl OidcVerifier {
    /// Resolve the key set and load it.
    ///
    /// Fails when discovery fails, the discovery document has no `jwks_uri`,
    /// or the key set cannot be fetched.
    pub async fn new(config: OidcVerifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {e}")))?;

        let jwks_uri = match config.jwks_uri.clone() {
            Some(uri) => uri,
            None => discover_jwks_uri(&config, &client).await?,
        };

        let jwks = Arc::new(JwksCache::new(
            jwks_uri,
            client,
            config.jwks_cache_ttl,
            config.jwks_refresh_cooldown,
        ));

        // Initial JWKS fetch
        jwks.refresh().await?;

        tracing::info!(
            issuer = config.issuer(),
            jwks_uri = %jwks.jwks_uri(),
            "OIDC verifier ready"
        );

        Ok(Self { config, jwks })
    }

    #[must_use]
    pub const fn config(&self) -> &OidcVerifierConfig {
        &self.config
    }

    /// Background refresher for this verifier's key set
    #[must_use]
    pub fn refresh_task(&self, interval: Duration) -> JwksRefreshTask {
        JwksRefreshTask::new(Arc::clone(&self.jwks), interval)
    }

    /// Verify an assertion and extract the configured user.
    pub async fn verify(
        &self,
        assertion: &str,
    ) -> std::result::Result<VerifiedAssertion, RejectReason> {
        let header = decode_header(assertion).map_err(|_| RejectReason::OidcTokenInvalid)?;

        if !is_asymmetric(header.alg) {
            tracing::debug!(alg = ?header.alg, "Rejecting assertion with symmetric algorithm");
            return Err(RejectReason::OidcTokenInvalid);
        }

        let key = self
            .jwks
            .get_key(header.kid.as_deref(), header.alg)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "No verification key for assertion");
                RejectReason::from(&e)
            })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = self.config.clock_skew.as_secs();

        let claims = jsonwebtoken::decode::<Value>(assertion, &key, &validation)?.claims;

        let user = user_claim(&claims, &self.config.user_claim)
            .ok_or(RejectReason::OidcUserClaimMissing)?
            .to_string();

        if let Some(domains) = &self.config.allowed_domains
            && !email_domain_allowed(email_claim(&claims), domains)
        {
            return Err(RejectReason::OidcDomainNotAllowed);
        }

        if let Some(emails) = self.config.allowed_emails()
            && !email_allowed(email_claim(&claims), emails)
        {
            return Err(RejectReason::OidcEmailNotAllowed);
        }

        Ok(VerifiedAssertion { user, claims })
    }
}

#[async_trait]
impl AssertionVerifier for OidcVerifier {
    async fn verify(&self, assertion: &str) -> std::result::Result<VerifiedAssertion, RejectReason> {
        Self::verify(self, assertion).await
    }
}

const fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// The one discovery field the verifier needs
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: Option<String>,
}

/// Fetch `{issuer}/.well-known/openid-configuration` and return its `jwks_uri`
async fn discover_jwks_uri(config: &OidcVerifierConfig, client: &reqwest::Client) -> Result<Url> {
    let discovery_url = config.discovery_url();
    tracing::info!(issuer = config.issuer(), "Discovering OIDC provider");

    let document: DiscoveryDocument = client
        .get(&discovery_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| AuthError::DiscoveryFailed(e.to_string()))?
        .json()
        .await
        .map_err(|e| AuthError::DiscoveryFailed(format!("Invalid discovery document: {e}")))?;

    let jwks_uri = document.jwks_uri.ok_or_else(|| {
        AuthError::DiscoveryFailed(format!("{discovery_url} has no jwks_uri"))
    })?;

    Url::parse(&jwks_uri)
        .map_err(|e| AuthError::DiscoveryFailed(format!("Invalid JWKS URI: {e}")))
}

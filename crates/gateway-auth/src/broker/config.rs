//! Token broker configuration

use std::fmt;
use std::time::Duration;

use url::Url;

use super::error::{BrokerError, Result};
use crate::constants::{DEFAULT_AUTHORITY, LONG_HTTP_TIMEOUT, SHORT_HTTP_TIMEOUT};

/// Application registration and endpoint settings for the broker.
///
/// The broker is disabled unless client id, client secret and tenant id are
/// all set.
#[derive(Clone)]
pub struct BrokerConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    /// Token authority; the tenant id is appended as the first path segment
    pub authority: String,
    /// Scope for the first (silent) step; defaults to `api://{client_id}/.default`
    pub own_app_scope: Option<String>,
    /// Budget for refresh-token acquisition
    pub silent_timeout: Duration,
    /// Budget for the on-behalf-of exchange
    pub obo_timeout: Duration,
}

// Client secret never reaches logs
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("tenant_id", &self.tenant_id)
            .field("authority", &self.authority)
            .field("own_app_scope", &self.own_app_scope)
            .field("silent_timeout", &self.silent_timeout)
            .field("obo_timeout", &self.obo_timeout)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            tenant_id: None,
            authority: DEFAULT_AUTHORITY.to_string(),
            own_app_scope: None,
            silent_timeout: LONG_HTTP_TIMEOUT,
            obo_timeout: SHORT_HTTP_TIMEOUT,
        }
    }
}

/// Borrowed application credentials, present only when fully configured
#[derive(Clone, Copy)]
pub(crate) struct Credentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub tenant_id: &'a str,
}

impl BrokerConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    #[must_use]
    pub fn with_own_app_scope(mut self, scope: impl Into<String>) -> Self {
        self.own_app_scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    pub(crate) fn credentials(&self) -> Result<Credentials<'_>> {
        Ok(Credentials {
            client_id: required(self.client_id.as_deref(), "client id")?,
            client_secret: required(self.client_secret.as_deref(), "client secret")?,
            tenant_id: required(self.tenant_id.as_deref(), "tenant id")?,
        })
    }

    /// Scope the silent step requests: the broker's own application
    pub fn own_app_scope(&self) -> Result<String> {
        if let Some(scope) = &self.own_app_scope {
            return Ok(scope.clone());
        }
        let client_id = required(self.client_id.as_deref(), "client id")?;
        Ok(format!("api://{client_id}/.default"))
    }

    /// `{authority}/{tenant}/oauth2/v2.0/token`
    pub fn token_endpoint(&self) -> Result<Url> {
        let tenant_id = required(self.tenant_id.as_deref(), "tenant id")?;
        let base = self.authority.trim().trim_end_matches('/');
        Url::parse(&format!("{base}/{tenant_id}/oauth2/v2.0/token")).map_err(|e| {
            tracing::error!(authority = %self.authority, error = %e, "Invalid token authority");
            BrokerError::NotConfigured("authority")
        })
    }
}

fn required<'a>(value: Option<&'a str>, what: &'static str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(BrokerError::NotConfigured(what))
}

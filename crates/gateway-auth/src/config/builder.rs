//! Configuration builder

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::Error;
use crate::auth::{AuthConfig, AuthMode, OidcVerifierConfig};
use crate::broker::BrokerConfig;
use crate::constants::DEFAULT_TAILSCALE_HOST_SUFFIX;

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub broker: BrokerConfig,
    pub telemetry: TelemetryConfig,
    /// Background key-set refresh period; `None` disables the task
    pub jwks_refresh_interval: Option<Duration>,
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub log_level: String,
    pub json_logs: bool,
}

/// OIDC settings collected before validation
#[derive(Debug, Default)]
struct OidcSettings {
    issuer: Option<String>,
    audience: Option<String>,
    jwks_uri: Option<Url>,
    user_claim: Option<String>,
    allowed_domains: Option<Vec<String>>,
    allowed_emails: Option<Vec<String>>,
    clock_skew: Option<Duration>,
}

/// Configuration builder with fluent API
pub struct ConfigBuilder {
    mode: AuthMode,
    token: Option<String>,
    password: Option<String>,
    allow_tailscale_identity: bool,
    tailscale_host_suffix: String,
    oidc: OidcSettings,
    jwks_refresh_interval: Option<Duration>,
    broker: BrokerConfig,
    telemetry: TelemetryConfig,
}

// Secrets never reach logs
impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("mode", &self.mode)
            .field("has_token", &self.token.is_some())
            .field("has_password", &self.password.is_some())
            .field("allow_tailscale_identity", &self.allow_tailscale_identity)
            .field("tailscale_host_suffix", &self.tailscale_host_suffix)
            .field("oidc", &self.oidc)
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("broker", &self.broker)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: AuthMode::Token,
            token: None,
            password: None,
            allow_tailscale_identity: false,
            tailscale_host_suffix: DEFAULT_TAILSCALE_HOST_SUFFIX.to_string(),
            oidc: OidcSettings::default(),
            jwks_refresh_interval: None,
            broker: BrokerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    // Connection auth

    #[must_use]
    pub const fn mode(mut self, mode: AuthMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn token(mut self, token: String) -> Self {
        self.token = non_empty(token);
        self
    }

    #[must_use]
    pub fn password(mut self, password: String) -> Self {
        self.password = non_empty(password);
        self
    }

    #[must_use]
    pub const fn allow_tailscale_identity(mut self, allow: bool) -> Self {
        self.allow_tailscale_identity = allow;
        self
    }

    #[must_use]
    pub fn tailscale_host_suffix(mut self, suffix: String) -> Self {
        self.tailscale_host_suffix = suffix;
        self
    }

    // OIDC

    #[must_use]
    pub fn oidc_issuer(mut self, issuer: String) -> Self {
        self.oidc.issuer = non_empty(issuer);
        self
    }

    #[must_use]
    pub fn oidc_audience(mut self, audience: String) -> Self {
        self.oidc.audience = non_empty(audience);
        self
    }

    #[must_use]
    pub fn oidc_jwks_uri(mut self, uri: Url) -> Self {
        self.oidc.jwks_uri = Some(uri);
        self
    }

    #[must_use]
    pub fn oidc_user_claim(mut self, claim: String) -> Self {
        self.oidc.user_claim = non_empty(claim);
        self
    }

    #[must_use]
    pub fn oidc_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.oidc.allowed_domains = Some(domains);
        self
    }

    #[must_use]
    pub fn oidc_allowed_emails(mut self, emails: Vec<String>) -> Self {
        self.oidc.allowed_emails = Some(emails);
        self
    }

    #[must_use]
    pub const fn oidc_clock_skew(mut self, skew: Duration) -> Self {
        self.oidc.clock_skew = Some(skew);
        self
    }

    #[must_use]
    pub const fn jwks_refresh_interval(mut self, interval: Duration) -> Self {
        self.jwks_refresh_interval = Some(interval);
        self
    }

    // Token broker

    #[must_use]
    pub fn client_id(mut self, client_id: String) -> Self {
        self.broker.client_id = non_empty(client_id);
        self
    }

    #[must_use]
    pub fn client_secret(mut self, secret: String) -> Self {
        self.broker.client_secret = non_empty(secret);
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, tenant_id: String) -> Self {
        self.broker.tenant_id = non_empty(tenant_id);
        self
    }

    #[must_use]
    pub fn broker_authority(mut self, authority: Url) -> Self {
        self.broker.authority = authority.to_string();
        self
    }

    #[must_use]
    pub fn broker_own_app_scope(mut self, scope: String) -> Self {
        self.broker.own_app_scope = non_empty(scope);
        self
    }

    #[must_use]
    pub const fn broker_silent_timeout(mut self, timeout: Duration) -> Self {
        self.broker.silent_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn broker_obo_timeout(mut self, timeout: Duration) -> Self {
        self.broker.obo_timeout = timeout;
        self
    }

    // Telemetry

    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.telemetry.otlp_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn service_name(mut self, name: String) -> Self {
        self.telemetry.service_name = name;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: String) -> Self {
        self.telemetry.log_level = level;
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> crate::Result<Config> {
        let oidc = build_oidc(self.oidc)?;

        if self.mode == AuthMode::Oidc && oidc.is_none() {
            return Err(Error::Config(
                "oidc mode requires an OIDC issuer and audience".into(),
            ));
        }

        let service_name = if self.telemetry.service_name.is_empty() {
            "gateway-auth".to_string()
        } else {
            self.telemetry.service_name
        };

        let log_level = if self.telemetry.log_level.is_empty() {
            "info".to_string()
        } else {
            self.telemetry.log_level
        };

        Ok(Config {
            auth: AuthConfig {
                mode: self.mode,
                token: self.token,
                password: self.password,
                allow_tailscale_identity: self.allow_tailscale_identity,
                tailscale_host_suffix: self.tailscale_host_suffix,
                oidc,
            },
            broker: self.broker,
            telemetry: TelemetryConfig {
                otlp_endpoint: self.telemetry.otlp_endpoint,
                service_name,
                log_level,
                json_logs: self.telemetry.json_logs,
            },
            jwks_refresh_interval: self.jwks_refresh_interval,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_oidc(settings: OidcSettings) -> crate::Result<Option<OidcVerifierConfig>> {
    let (issuer, audience) = match (settings.issuer, settings.audience) {
        (None, None) => return Ok(None),
        (Some(issuer), Some(audience)) => (issuer, audience),
        (Some(_), None) => return Err(Error::Config("OIDC audience is required".into())),
        (None, Some(_)) => return Err(Error::Config("OIDC issuer is required".into())),
    };

    let mut config = OidcVerifierConfig::new(&issuer, audience)
        .map_err(|e| Error::Config(format!("Invalid OIDC issuer: {e}")))?;

    if let Some(uri) = settings.jwks_uri {
        config = config.with_jwks_uri(uri);
    }
    if let Some(claim) = settings.user_claim {
        config = config.with_user_claim(claim);
    }
    // Empty allowlists leave the check off
    if let Some(domains) = settings.allowed_domains.and_then(non_empty_list) {
        config = config.with_allowed_domains(domains);
    }
    if let Some(emails) = settings.allowed_emails.and_then(non_empty_list) {
        config = config.with_allowed_emails(emails);
    }
    if let Some(skew) = settings.clock_skew {
        config = config.with_clock_skew(skew);
    }

    Ok(Some(config))
}

fn non_empty_list(values: Vec<String>) -> Option<Vec<String>> {
    let values: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!values.is_empty()).then_some(values)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

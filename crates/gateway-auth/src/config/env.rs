//! Environment variable loading for configuration

use std::env;

use url::Url;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::auth::AuthMode;

/// Environment variable names
mod vars {
    pub const GATEWAY_AUTH_MODE: &str = "GATEWAY_AUTH_MODE";
    pub const GATEWAY_AUTH_TOKEN: &str = "GATEWAY_AUTH_TOKEN";
    pub const GATEWAY_AUTH_PASSWORD: &str = "GATEWAY_AUTH_PASSWORD";
    pub const GATEWAY_AUTH_ALLOW_TAILSCALE: &str = "GATEWAY_AUTH_ALLOW_TAILSCALE";
    pub const GATEWAY_OIDC_ISSUER: &str = "GATEWAY_OIDC_ISSUER";
    pub const GATEWAY_OIDC_AUDIENCE: &str = "GATEWAY_OIDC_AUDIENCE";
    pub const GATEWAY_OIDC_JWKS_URI: &str = "GATEWAY_OIDC_JWKS_URI";
    pub const GATEWAY_OIDC_USER_CLAIM: &str = "GATEWAY_OIDC_USER_CLAIM";
    pub const GATEWAY_OIDC_ALLOWED_DOMAINS: &str = "GATEWAY_OIDC_ALLOWED_DOMAINS";
    pub const GATEWAY_OIDC_ALLOWED_EMAILS: &str = "GATEWAY_OIDC_ALLOWED_EMAILS";
    pub const MS_CLIENT_ID: &str = "MS_CLIENT_ID";
    pub const MS_CLIENT_SECRET: &str = "MS_CLIENT_SECRET";
    pub const MS_TENANT_ID: &str = "MS_TENANT_ID";
    pub const GATEWAY_BROKER_AUTHORITY: &str = "GATEWAY_BROKER_AUTHORITY";
    pub const GATEWAY_BROKER_OWN_SCOPE: &str = "GATEWAY_BROKER_OWN_SCOPE";
    pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const GATEWAY_JSON_LOGS: &str = "GATEWAY_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    // Connection auth
    if let Ok(mode) = env::var(vars::GATEWAY_AUTH_MODE) {
        let mode: AuthMode = mode.parse()?;
        builder = builder.mode(mode);
    }

    if let Ok(token) = env::var(vars::GATEWAY_AUTH_TOKEN) {
        builder = builder.token(token);
    }

    if let Ok(password) = env::var(vars::GATEWAY_AUTH_PASSWORD) {
        builder = builder.password(password);
    }

    if let Ok(val) = env::var(vars::GATEWAY_AUTH_ALLOW_TAILSCALE) {
        builder = builder.allow_tailscale_identity(parse_bool(&val));
    }

    // OIDC
    if let Ok(issuer) = env::var(vars::GATEWAY_OIDC_ISSUER) {
        builder = builder.oidc_issuer(issuer);
    }

    if let Ok(audience) = env::var(vars::GATEWAY_OIDC_AUDIENCE) {
        builder = builder.oidc_audience(audience);
    }

    if let Ok(uri_str) = env::var(vars::GATEWAY_OIDC_JWKS_URI) {
        let uri = Url::parse(&uri_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::GATEWAY_OIDC_JWKS_URI, e))
        })?;
        builder = builder.oidc_jwks_uri(uri);
    }

    if let Ok(claim) = env::var(vars::GATEWAY_OIDC_USER_CLAIM) {
        builder = builder.oidc_user_claim(claim);
    }

    if let Ok(domains) = env::var(vars::GATEWAY_OIDC_ALLOWED_DOMAINS) {
        builder = builder.oidc_allowed_domains(parse_list(&domains));
    }

    if let Ok(emails) = env::var(vars::GATEWAY_OIDC_ALLOWED_EMAILS) {
        builder = builder.oidc_allowed_emails(parse_list(&emails));
    }

    // Token broker
    if let Ok(client_id) = env::var(vars::MS_CLIENT_ID) {
        builder = builder.client_id(client_id);
    }

    if let Ok(secret) = env::var(vars::MS_CLIENT_SECRET) {
        builder = builder.client_secret(secret);
    }

    if let Ok(tenant_id) = env::var(vars::MS_TENANT_ID) {
        builder = builder.tenant_id(tenant_id);
    }

    if let Ok(authority_str) = env::var(vars::GATEWAY_BROKER_AUTHORITY) {
        let authority = Url::parse(&authority_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::GATEWAY_BROKER_AUTHORITY, e))
        })?;
        builder = builder.broker_authority(authority);
    }

    if let Ok(scope) = env::var(vars::GATEWAY_BROKER_OWN_SCOPE) {
        builder = builder.broker_own_app_scope(scope);
    }

    // Telemetry
    if let Ok(endpoint) = env::var(vars::OTEL_EXPORTER_OTLP_ENDPOINT) {
        builder = builder.otlp_endpoint(Some(endpoint));
    }

    if let Ok(name) = env::var(vars::OTEL_SERVICE_NAME) {
        builder = builder.service_name(name);
    }

    if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::GATEWAY_JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Comma-separated list, blanks dropped
fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

//! TOML configuration file loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::auth::AuthMode;

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./gateway-auth.toml",
    "~/.config/gateway-auth/config.toml",
    "/etc/gateway-auth/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config)
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    if let Some(auth) = config.auth {
        if let Some(mode) = auth.mode {
            let mode: AuthMode = mode.parse()?;
            builder = builder.mode(mode);
        }
        if let Some(token) = auth.token {
            builder = builder.token(token);
        }
        if let Some(password) = auth.password {
            builder = builder.password(password);
        }
        if let Some(allow) = auth.allow_tailscale_identity {
            builder = builder.allow_tailscale_identity(allow);
        }
        if let Some(suffix) = auth.tailscale_host_suffix {
            builder = builder.tailscale_host_suffix(suffix);
        }
    }

    if let Some(oidc) = config.oidc {
        if let Some(issuer) = oidc.issuer {
            builder = builder.oidc_issuer(issuer);
        }
        if let Some(audience) = oidc.audience {
            builder = builder.oidc_audience(audience);
        }
        if let Some(uri) = oidc.jwks_uri {
            let uri = Url::parse(&uri)
                .map_err(|e| crate::Error::Config(format!("Invalid JWKS URI: {e}")))?;
            builder = builder.oidc_jwks_uri(uri);
        }
        if let Some(claim) = oidc.user_claim {
            builder = builder.oidc_user_claim(claim);
        }
        if let Some(domains) = oidc.allowed_domains {
            builder = builder.oidc_allowed_domains(domains);
        }
        if let Some(emails) = oidc.allowed_emails {
            builder = builder.oidc_allowed_emails(emails);
        }
        if let Some(secs) = oidc.clock_skew_secs {
            builder = builder.oidc_clock_skew(Duration::from_secs(secs));
        }
        if let Some(secs) = oidc.jwks_refresh_interval_secs
            && secs > 0
        {
            builder = builder.jwks_refresh_interval(Duration::from_secs(secs));
        }
    }

    if let Some(broker) = config.broker {
        if let Some(client_id) = broker.client_id {
            builder = builder.client_id(client_id);
        }
        if let Some(secret) = broker.client_secret {
            builder = builder.client_secret(secret);
        }
        if let Some(tenant_id) = broker.tenant_id {
            builder = builder.tenant_id(tenant_id);
        }
        if let Some(authority) = broker.authority {
            let authority = Url::parse(&authority)
                .map_err(|e| crate::Error::Config(format!("Invalid broker authority: {e}")))?;
            builder = builder.broker_authority(authority);
        }
        if let Some(scope) = broker.own_app_scope {
            builder = builder.broker_own_app_scope(scope);
        }
        if let Some(secs) = broker.silent_timeout_secs {
            builder = builder.broker_silent_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = broker.obo_timeout_secs {
            builder = builder.broker_obo_timeout(Duration::from_secs(secs));
        }
    }

    if let Some(obs) = config.observability {
        if let Some(endpoint) = obs.otlp_endpoint {
            builder = builder.otlp_endpoint(Some(endpoint));
        }

        if let Some(name) = obs.service_name {
            builder = builder.service_name(name);
        }

        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    auth: Option<AuthFileConfig>,
    oidc: Option<OidcFileConfig>,
    broker: Option<BrokerFileConfig>,
    observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
struct AuthFileConfig {
    mode: Option<String>,
    token: Option<String>,
    password: Option<String>,
    allow_tailscale_identity: Option<bool>,
    tailscale_host_suffix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OidcFileConfig {
    issuer: Option<String>,
    audience: Option<String>,
    jwks_uri: Option<String>,
    user_claim: Option<String>,
    allowed_domains: Option<Vec<String>>,
    allowed_emails: Option<Vec<String>>,
    clock_skew_secs: Option<u64>,
    jwks_refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BrokerFileConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant_id: Option<String>,
    authority: Option<String>,
    own_app_scope: Option<String>,
    silent_timeout_secs: Option<u64>,
    obo_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    otlp_endpoint: Option<String>,
    service_name: Option<String>,
    log_level: Option<String>,
    json_logs: Option<bool>,
}

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gateway_auth::auth::{ConnectAuth, ConnectionInfo, HeaderIdentityProxy, OidcVerifier};
use gateway_auth::config;
use gateway_auth::observability::{init_observability, shutdown_observability};
use gateway_auth::{Authorizer, Config, TokenBroker};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "gateway-auth")]
#[command(about = "Gateway connection authorization and downstream token brokering", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long, global = true)]
    json_logs: bool,

    /// Write Prometheus metrics to stderr after the command finishes
    #[cfg(feature = "metrics")]
    #[arg(long, global = true)]
    dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify an OIDC assertion and print the extracted user and claims
    Verify {
        /// Compact JWS assertion
        assertion: String,
    },

    /// Run one connection attempt through the authorizer and print the result
    Authorize {
        /// Shared token presented by the client
        #[arg(long, env = "GATEWAY_CONNECT_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Shared password presented by the client
        #[arg(long, env = "GATEWAY_CONNECT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// OIDC assertion presented by the client
        #[arg(long, env = "GATEWAY_CONNECT_OIDC_TOKEN", hide_env_values = true)]
        oidc_token: Option<String>,

        /// Peer address of the simulated connection
        #[arg(long)]
        remote_addr: Option<IpAddr>,

        /// Request header of the simulated connection (name=value, repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Acquire a downstream access token on behalf of a user
    Token {
        /// The user's refresh credential
        #[arg(long, env = "GATEWAY_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,

        /// Downstream scope (repeatable)
        #[arg(long = "scope", required = true)]
        scopes: Vec<String>,

        /// Partition cached tokens by this subject
        #[arg(long)]
        subject: Option<String>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Load configuration with precedence: env > file > defaults, then CLI flags
    let mut builder = if let Some(ref path) = args.config {
        config::load_config_from_path(path)?
    } else {
        config::load_config()?
    };

    if args.verbose {
        builder = builder.log_level("debug".to_string());
    }
    if args.json_logs {
        builder = builder.json_logs(true);
    }

    let config = builder.build()?;

    init_observability(&config.telemetry)?;

    tracing::debug!(mode = config.auth.mode.as_str(), "Configuration loaded");

    let shutdown = CancellationToken::new();
    #[cfg(feature = "metrics")]
    let dump_metrics = args.dump_metrics;

    let result = run(args.command, config, &shutdown).await;

    #[cfg(feature = "metrics")]
    {
        if dump_metrics {
            eprint!("{}", gateway_auth::observability::render_metrics());
        }
    }

    shutdown.cancel();
    shutdown_observability();

    result
}

async fn run(
    command: Command,
    config: Config,
    shutdown: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Verify { assertion } => {
            let verifier = build_verifier(&config, shutdown)
                .await?
                .ok_or_else(|| anyhow::anyhow!("OIDC issuer and audience are not configured"))?;

            match verifier.verify(&assertion).await {
                Ok(verified) => {
                    let output = serde_json::json!({
                        "user": verified.user,
                        "claims": verified.claims,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(reason) => {
                    println!("{}", serde_json::json!({ "reason": reason.as_str() }));
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Authorize {
            token,
            password,
            oidc_token,
            remote_addr,
            headers,
        } => {
            let verifier = build_verifier(&config, shutdown).await?;

            let mut authorizer =
                Authorizer::new(config.auth).with_identity_proxy(Arc::new(HeaderIdentityProxy));
            if let Some(verifier) = verifier {
                authorizer = authorizer.with_verifier(verifier);
            }

            let mut conn = ConnectionInfo::new(remote_addr);
            for (name, value) in headers {
                conn.insert_header(&name, value);
            }

            let presented = ConnectAuth {
                token,
                password,
                oidc_token,
            };

            let result = authorizer.authorize(&presented, &conn).await;
            println!("{}", serde_json::to_string(&result)?);

            Ok(if result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Token {
            refresh_token,
            scopes,
            subject,
        } => {
            let broker = TokenBroker::new(config.broker)?;

            let token = match subject.as_deref() {
                Some(subject) => {
                    broker
                        .acquire_downstream_for(subject, &refresh_token, &scopes)
                        .await?
                }
                None => broker.acquire_downstream(&refresh_token, &scopes).await?,
            };

            let output = serde_json::json!({
                "access_token": token.access_token,
                "expires_in": token.expires_in().as_secs(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the verifier when OIDC is configured and start its key refresher
async fn build_verifier(
    config: &Config,
    shutdown: &CancellationToken,
) -> anyhow::Result<Option<Arc<OidcVerifier>>> {
    let Some(oidc) = config.auth.oidc.clone() else {
        return Ok(None);
    };

    let verifier = Arc::new(OidcVerifier::new(oidc).await?);

    if let Some(interval) = config.jwks_refresh_interval {
        tracing::info!(?interval, "Starting background JWKS refresh");
        drop(verifier.refresh_task(interval).spawn(shutdown.clone()));
    }

    Ok(Some(verifier))
}

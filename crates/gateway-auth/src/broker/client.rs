//! Downstream token acquisition
//!
//! Two-step delegation against the configured token endpoint: a refresh
//! token is first exchanged for a token scoped to this application (silent
//! acquisition), which is then exchanged for a downstream-scoped token with
//! the on-behalf-of grant. Both steps share one expiry-buffered cache.

use std::time::{Duration, Instant};

use serde_json::Value;

use super::cache::{AccessToken, CacheKey, TokenCache};
use super::config::BrokerConfig;
use super::error::{BrokerError, Result};
use crate::constants::{DEFAULT_TOKEN_LIFETIME, GRANT_TYPE_JWT_BEARER, GRANT_TYPE_REFRESH_TOKEN};

/// Exchanges refresh credentials for downstream-scoped access tokens.
///
/// Construct once per process and share behind an `Arc`.
#[derive(Debug)]
pub struct TokenBroker {
    config: BrokerConfig,
    http: reqwest::Client,
    cache: TokenCache,
}

impl TokenBroker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BrokerError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            cache: TokenCache::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub const fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Token for `own_app_scope` obtained with the refresh-token grant.
    pub async fn acquire_silent(
        &self,
        refresh_credential: &str,
        own_app_scope: &str,
    ) -> Result<AccessToken> {
        self.silent(None, refresh_credential, own_app_scope).await
    }

    /// Downstream token obtained with the on-behalf-of grant.
    ///
    /// `assertion` must be a token whose audience is this application, as
    /// returned by [`Self::acquire_silent`].
    pub async fn exchange_on_behalf_of<S: AsRef<str>>(
        &self,
        assertion: &str,
        downstream_scopes: &[S],
    ) -> Result<AccessToken> {
        self.on_behalf_of(None, assertion, &join_scopes(downstream_scopes))
            .await
    }

    /// Silent acquisition followed by the on-behalf-of exchange.
    ///
    /// A silent failure is returned unchanged and no exchange is attempted.
    pub async fn acquire_downstream<S: AsRef<str>>(
        &self,
        refresh_credential: &str,
        downstream_scopes: &[S],
    ) -> Result<AccessToken> {
        self.downstream(None, refresh_credential, downstream_scopes)
            .await
    }

    /// [`Self::acquire_downstream`] with cache entries partitioned by `subject`.
    ///
    /// Use this when one broker serves several end users.
    pub async fn acquire_downstream_for<S: AsRef<str>>(
        &self,
        subject: &str,
        refresh_credential: &str,
        downstream_scopes: &[S],
    ) -> Result<AccessToken> {
        self.downstream(Some(subject), refresh_credential, downstream_scopes)
            .await
    }

    async fn downstream<S: AsRef<str>>(
        &self,
        subject: Option<&str>,
        refresh_credential: &str,
        downstream_scopes: &[S],
    ) -> Result<AccessToken> {
        let own_scope = self.config.own_app_scope()?;
        let own_token = self.silent(subject, refresh_credential, &own_scope).await?;
        self.on_behalf_of(
            subject,
            &own_token.access_token,
            &join_scopes(downstream_scopes),
        )
        .await
    }

    async fn silent(
        &self,
        subject: Option<&str>,
        refresh_credential: &str,
        scope: &str,
    ) -> Result<AccessToken> {
        let creds = self.config.credentials()?;
        let key = CacheKey::silent(subject, scope);
        if let Some(token) = self.cached(&key) {
            return Ok(token);
        }

        let form = [
            ("client_id", creds.client_id),
            ("client_secret", creds.client_secret),
            ("grant_type", GRANT_TYPE_REFRESH_TOKEN),
            ("refresh_token", refresh_credential),
            ("scope", scope),
        ];
        let token = self
            .request_token("refresh_token", &form, self.config.silent_timeout)
            .await?;

        self.cache.insert(key, token.clone());
        Ok(token)
    }

    async fn on_behalf_of(
        &self,
        subject: Option<&str>,
        assertion: &str,
        scopes: &str,
    ) -> Result<AccessToken> {
        let creds = self.config.credentials()?;
        let key = CacheKey::on_behalf_of(subject, scopes);
        if let Some(token) = self.cached(&key) {
            return Ok(token);
        }

        let form = [
            ("client_id", creds.client_id),
            ("client_secret", creds.client_secret),
            ("grant_type", GRANT_TYPE_JWT_BEARER),
            ("assertion", assertion),
            ("scope", scopes),
            ("requested_token_use", "on_behalf_of"),
        ];
        let token = self
            .request_token("on_behalf_of", &form, self.config.obo_timeout)
            .await?;

        self.cache.insert(key, token.clone());
        Ok(token)
    }

    fn cached(&self, key: &CacheKey) -> Option<AccessToken> {
        let hit = self.cache.get(key);
        let kind = if hit.is_some() { "hit" } else { "miss" };
        tracing::debug!(cache = kind, "Token cache lookup");

        #[cfg(feature = "metrics")]
        {
            if hit.is_some() {
                crate::observability::record_broker_cache_hit();
            } else {
                crate::observability::record_broker_cache_miss();
            }
        }

        hit
    }

    async fn request_token(
        &self,
        grant: &'static str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<AccessToken> {
        let endpoint = self.config.token_endpoint()?;
        let started = Instant::now();

        let outcome = self.post_form(endpoint, form, timeout).await;

        match &outcome {
            Ok(token) => tracing::debug!(
                grant,
                elapsed_ms = started.elapsed().as_millis(),
                expires_in_secs = token.expires_in().as_secs(),
                "Token acquired"
            ),
            Err(e) => tracing::warn!(
                grant,
                kind = e.kind(),
                error = %e,
                "Token request failed"
            ),
        }

        #[cfg(feature = "metrics")]
        {
            let status = outcome.as_ref().map_or_else(BrokerError::kind, |_| "success");
            crate::observability::record_token_request(grant, status, started.elapsed());
        }

        outcome
    }

    async fn post_form(
        &self,
        endpoint: url::Url,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<AccessToken> {
        let response = self
            .http
            .post(endpoint)
            .timeout(timeout)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BrokerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        parse_token_response(&body)
    }
}

fn join_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `access_token` is required; `expires_in` may be a number or a numeric
/// string and falls back to one hour.
fn parse_token_response(body: &str) -> Result<AccessToken> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| BrokerError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let access_token = json
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BrokerError::MalformedResponse("missing access_token".to_string()))?;

    let lifetime = json
        .get("expires_in")
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
        .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);

    Ok(AccessToken::new(access_token, lifetime))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";
    const OWN_SCOPE: &str = "api://client-1/.default";

    fn broker(server: &MockServer) -> TokenBroker {
        let config = BrokerConfig::new("client-1", "secret-1", "tenant-1").with_authority(server.uri());
        TokenBroker::new(config).unwrap()
    }

    fn token_body(token: &str, expires_in: u64) -> Value {
        json!({
            "token_type": "Bearer",
            "access_token": token,
            "expires_in": expires_in,
        })
    }

    async fn mount_silent(server: &MockServer, response: ResponseTemplate, expected: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(response)
            .expect(expected)
            .mount(server)
            .await;
    }

    async fn mount_obo(server: &MockServer, response: ResponseTemplate, expected: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("requested_token_use=on_behalf_of"))
            .respond_with(response)
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_silent_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-123"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("client_secret=secret-1"))
            .and(body_string_contains("scope=api%3A%2F%2Fclient-1%2F.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("own-tok", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let token = broker(&server).acquire_silent("rt-123", OWN_SCOPE).await.unwrap();
        assert_eq!(token.access_token, "own-tok");
        assert!(token.expires_in() > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_obo_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .and(body_string_contains("assertion=own-tok"))
            .and(body_string_contains("requested_token_use=on_behalf_of"))
            .and(body_string_contains("scope=Mail.Read+User.Read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("mail-tok", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let token = broker(&server)
            .exchange_on_behalf_of("own-tok", &["Mail.Read", "User.Read"])
            .await
            .unwrap();
        assert_eq!(token.access_token, "mail-tok");
    }

    #[tokio::test]
    async fn test_downstream_uses_silent_token_as_assertion() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("own-tok", 3600)),
            1,
        )
        .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("assertion=own-tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("cal-tok", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let token = broker(&server)
            .acquire_downstream("rt-123", &["Calendars.Read"])
            .await
            .unwrap();
        assert_eq!(token.access_token, "cal-tok");
    }

    #[tokio::test]
    async fn test_cached_token_reused() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("own-tok", 3600)),
            1,
        )
        .await;
        mount_obo(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("mail-tok", 3600)),
            1,
        )
        .await;

        let broker = broker(&server);
        let first = broker.acquire_downstream("rt-123", &["Mail.Read"]).await.unwrap();
        let second = broker.acquire_downstream("rt-123", &["Mail.Read"]).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_token_inside_buffer_refetched_once() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("short-tok", 200)),
            2,
        )
        .await;

        let broker = broker(&server);
        broker.acquire_silent("rt-123", OWN_SCOPE).await.unwrap();
        let token = broker.acquire_silent("rt-123", OWN_SCOPE).await.unwrap();
        assert_eq!(token.access_token, "short-tok");
    }

    #[tokio::test]
    async fn test_silent_failure_propagates_without_obo() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            1,
        )
        .await;
        mount_obo(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("never", 3600)),
            0,
        )
        .await;

        let err = broker(&server)
            .acquire_downstream("expired-rt", &["Mail.Read"])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::Upstream {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_not_configured_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok", 3600)))
            .expect(0)
            .mount(&server)
            .await;

        let config = BrokerConfig {
            client_secret: None,
            ..BrokerConfig::new("client-1", "secret-1", "tenant-1").with_authority(server.uri())
        };
        let broker = TokenBroker::new(config).unwrap();

        let err = broker.acquire_downstream("rt-123", &["Mail.Read"]).await.unwrap_err();
        assert!(err.is_not_configured());
        assert!(!err.is_retryable());

        let err = broker.exchange_on_behalf_of("own-tok", &["Mail.Read"]).await.unwrap_err();
        assert!(err.is_not_configured());
    }

    #[tokio::test]
    async fn test_missing_access_token_is_malformed() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})),
            1,
        )
        .await;

        let err = broker(&server).acquire_silent("rt-123", OWN_SCOPE).await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_failed_request_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("own-tok", 3600)),
            1,
        )
        .await;

        let broker = broker(&server);
        let err = broker.acquire_silent("rt-123", OWN_SCOPE).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(broker.cache().is_empty());

        let token = broker.acquire_silent("rt-123", OWN_SCOPE).await.unwrap();
        assert_eq!(token.access_token, "own-tok");
    }

    #[tokio::test]
    async fn test_subject_partitioned_cache() {
        let server = MockServer::start().await;
        mount_silent(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("own-tok", 3600)),
            2,
        )
        .await;
        mount_obo(
            &server,
            ResponseTemplate::new(200).set_body_json(token_body("mail-tok", 3600)),
            2,
        )
        .await;

        let broker = broker(&server);
        broker
            .acquire_downstream_for("alice", "rt-alice", &["Mail.Read"])
            .await
            .unwrap();
        broker
            .acquire_downstream_for("bob", "rt-bob", &["Mail.Read"])
            .await
            .unwrap();
        broker
            .acquire_downstream_for("alice", "rt-alice", &["Mail.Read"])
            .await
            .unwrap();

        assert_eq!(broker.cache().len(), 4);
    }

    #[test]
    fn test_parse_token_response() {
        let token = parse_token_response(r#"{"access_token":"a","expires_in":"120"}"#).unwrap();
        assert!(token.expires_in() <= Duration::from_secs(120));
        assert!(token.expires_in() > Duration::from_secs(100));

        let token = parse_token_response(r#"{"access_token":"a"}"#).unwrap();
        assert!(token.expires_in() > Duration::from_secs(3500));

        assert!(parse_token_response("not json").unwrap_err().is_malformed());
        assert!(
            parse_token_response(r#"{"access_token":""}"#)
                .unwrap_err()
                .is_malformed()
        );
    }

    #[tokio::test]
    async fn test_silent_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        let slow = ResponseTemplate::new(200)
            .set_body_json(token_body("late-tok", 3600))
            .set_delay(Duration::from_millis(500));
        mount_silent(&server, slow, 1).await;

        let mut config =
            BrokerConfig::new("client-1", "secret-1", "tenant-1").with_authority(server.uri());
        config.silent_timeout = Duration::from_millis(100);
        let broker = TokenBroker::new(config).unwrap();

        let err = broker.acquire_silent("rt-123", OWN_SCOPE).await.unwrap_err();
        assert!(matches!(&err, BrokerError::Transport(msg) if msg.starts_with("timed out")));
        assert!(err.is_retryable());
        assert!(broker.cache().is_empty());
    }

    #[tokio::test]
    async fn test_obo_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        let slow = ResponseTemplate::new(200)
            .set_body_json(token_body("late-tok", 3600))
            .set_delay(Duration::from_millis(500));
        mount_obo(&server, slow, 1).await;

        let mut config =
            BrokerConfig::new("client-1", "secret-1", "tenant-1").with_authority(server.uri());
        config.obo_timeout = Duration::from_millis(100);
        let broker = TokenBroker::new(config).unwrap();

        let err = broker
            .exchange_on_behalf_of("own-tok", &["Mail.Read"])
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
        assert!(broker.cache().is_empty());
    }
}

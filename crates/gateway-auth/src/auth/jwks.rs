//! JWKS fetching and caching

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use super::error::{AuthError, Result};

/// JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Key type (RSA, EC)
    pub kty: String,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// Key usage
    #[serde(default)]
    pub r#use: Option<String>,
    // RSA components
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC components
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Clone)]
struct JwkEntry {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl std::fmt::Debug for JwkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkEntry")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Thread-safe signing key cache.
///
/// Keys are refetched when older than `ttl`, and on demand when an assertion
/// names a key id the cache does not know (at most once per `cooldown`).
pub struct JwksCache {
    keys: RwLock<HashMap<String, JwkEntry>>,
    unnamed_keys: RwLock<Vec<JwkEntry>>,
    jwks_uri: Url,
    client: reqwest::Client,
    ttl: Duration,
    cooldown: Duration,
    last_refresh: RwLock<Option<Instant>>,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("jwks_uri", &self.jwks_uri)
            .field("ttl", &self.ttl)
            .field("cooldown", &self.cooldown)
            .field("keys_count", &self.keys.read().len())
            .finish_non_exhaustive()
    }
}

impl JwksCache {
    pub fn new(jwks_uri: Url, client: reqwest::Client, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            unnamed_keys: RwLock::new(Vec::new()),
            jwks_uri,
            client,
            ttl,
            cooldown,
            last_refresh: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Get key for validation
    pub async fn get_key(&self, kid: Option<&str>, alg: Algorithm) -> Result<DecodingKey> {
        if self.needs_refresh()
            && let Err(e) = self.refresh().await
        {
            if self.keys_count() == 0 {
                return Err(e);
            }
            tracing::warn!(error = %e, "JWKS refresh failed, keeping cached keys");
        }

        let Some(kid) = kid else {
            return self.find_by_algorithm(alg).ok_or(AuthError::NoMatchingKey);
        };

        if let Some(key) = self.find_named(kid, alg) {
            return Ok(key);
        }

        // Unknown key id: the issuer may have rotated its keys
        if self.cooldown_elapsed() {
            tracing::debug!(kid, "Unknown key id, refreshing JWKS");
            self.refresh().await?;
            if let Some(key) = self.find_named(kid, alg) {
                return Ok(key);
            }
        }

        Err(AuthError::KeyNotFound(kid.to_string()))
    }

    /// Refresh JWKS from remote
    pub async fn refresh(&self) -> Result<()> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "Refreshing JWKS");

        let response = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(AuthError::JwksFetch)?;

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::JwksParse(e.to_string()))?;

        let mut keys = HashMap::new();
        let mut unnamed = Vec::new();

        for jwk in jwks.keys {
            if let Some((key, alg)) = decode_jwk(&jwk)? {
                let entry = JwkEntry {
                    key,
                    algorithm: alg,
                };

                if let Some(kid) = &jwk.kid {
                    keys.insert(kid.clone(), entry);
                } else {
                    unnamed.push(entry);
                }
            }
        }

        let count = keys.len() + unnamed.len();
        *self.keys.write() = keys;
        *self.unnamed_keys.write() = unnamed;
        *self.last_refresh.write() = Some(Instant::now());

        tracing::info!(keys_count = count, "JWKS refreshed successfully");

        Ok(())
    }

    pub fn keys_count(&self) -> usize {
        self.keys.read().len() + self.unnamed_keys.read().len()
    }

    fn find_named(&self, kid: &str, alg: Algorithm) -> Option<DecodingKey> {
        self.keys
            .read()
            .get(kid)
            .filter(|entry| entry.algorithm == alg)
            .map(|entry| entry.key.clone())
    }

    fn find_by_algorithm(&self, alg: Algorithm) -> Option<DecodingKey> {
        let unnamed = self
            .unnamed_keys
            .read()
            .iter()
            .find(|entry| entry.algorithm == alg)
            .map(|entry| entry.key.clone());
        unnamed.or_else(|| {
            self.keys
                .read()
                .values()
                .find(|entry| entry.algorithm == alg)
                .map(|entry| entry.key.clone())
        })
    }

    fn needs_refresh(&self) -> bool {
        self.last_refresh
            .read()
            .is_none_or(|t| t.elapsed() > self.ttl)
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_refresh
            .read()
            .is_none_or(|t| t.elapsed() >= self.cooldown)
    }
}

fn decode_jwk(jwk: &Jwk) -> Result<Option<(DecodingKey, Algorithm)>> {
    if jwk.r#use.as_deref().is_some_and(|u| u != "sig") {
        return Ok(None);
    }

    let alg = match jwk.alg.as_deref() {
        Some("RS256") => Algorithm::RS256,
        Some("RS384") => Algorithm::RS384,
        Some("RS512") => Algorithm::RS512,
        Some("PS256") => Algorithm::PS256,
        Some("ES256") => Algorithm::ES256,
        Some("ES384") => Algorithm::ES384,
        None => {
            // Infer from key type
            match jwk.kty.as_str() {
                "RSA" => Algorithm::RS256,
                "EC" => match jwk.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    _ => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        _ => return Ok(None),
    };

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("Missing 'n' in RSA key".into()))?;
            let e = jwk
                .e
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("Missing 'e' in RSA key".into()))?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| AuthError::JwksParse(format!("Invalid RSA components: {e}")))?
        }
        "EC" => {
            let x = jwk
                .x
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("Missing 'x' in EC key".into()))?;
            let y = jwk
                .y
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("Missing 'y' in EC key".into()))?;
            DecodingKey::from_ec_components(x, y)
                .map_err(|e| AuthError::JwksParse(format!("Invalid EC components: {e}")))?
        }
        other => {
            tracing::debug!(kty = other, "Skipping unsupported key type");
            return Ok(None);
        }
    };

    Ok(Some((key, alg)))
}

/// Periodic key set refresh, stopped by a cancellation token
pub struct JwksRefreshTask {
    cache: Arc<JwksCache>,
    interval: Duration,
}

impl std::fmt::Debug for JwksRefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksRefreshTask")
            .field("cache", &self.cache)
            .field("interval", &self.interval)
            .finish()
    }
}

impl JwksRefreshTask {
    #[must_use]
    pub const fn new(cache: Arc<JwksCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub fn spawn(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately; the key set was loaded at construction
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.cache.refresh().await {
                            tracing::warn!(error = %e, "Background JWKS refresh failed");
                        }
                    }
                    () = shutdown.cancelled() => {
                        tracing::debug!("JWKS refresh task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{KEY_A, KEY_B, jwks_json};

    fn cache_for(server: &MockServer, cooldown: Duration) -> JwksCache {
        JwksCache::new(
            Url::parse(&format!("{}/jwks", server.uri())).unwrap(),
            reqwest::Client::new(),
            Duration::from_secs(3600),
            cooldown,
        )
    }

    #[test]
    fn test_jwk_set_deserialize() {
        let json = r#"{
            "keys": [
                {
                    "kid": "key1",
                    "kty": "RSA",
                    "alg": "RS256",
                    "n": "test_n",
                    "e": "AQAB"
                }
            ]
        }"#;
        let jwks: JwkSet = serde_json::from_str(json).unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, Some("key1".to_string()));
        assert_eq!(jwks.keys[0].kty, "RSA");
    }

    #[test]
    fn test_decode_skips_encryption_keys() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kid": "enc", "kty": "RSA", "use": "enc", "n": KEY_A.n, "e": "AQAB"
        }))
        .unwrap();
        assert!(decode_jwk(&jwk).unwrap().is_none());
    }

    #[test]
    fn test_decode_rsa_missing_modulus() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kid": "bad", "kty": "RSA", "alg": "RS256", "e": "AQAB"
        }))
        .unwrap();
        assert!(matches!(decode_jwk(&jwk), Err(AuthError::JwksParse(_))));
    }

    #[test]
    fn test_jwks_cache_needs_refresh_initially() {
        let cache = JwksCache::new(
            Url::parse("https://example.com/.well-known/jwks.json").unwrap(),
            reqwest::Client::new(),
            Duration::from_secs(3600),
            Duration::from_secs(30),
        );
        assert!(cache.needs_refresh());
        assert_eq!(cache.keys_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_loads_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[&KEY_A])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(30));
        cache.refresh().await.unwrap();

        assert_eq!(cache.keys_count(), 1);
        assert!(cache.get_key(Some(KEY_A.kid), Algorithm::RS256).await.is_ok());
        assert!(cache.get_key(None, Algorithm::RS256).await.is_ok());
        assert!(matches!(
            cache.get_key(None, Algorithm::ES256).await,
            Err(AuthError::NoMatchingKey)
        ));
    }

    #[tokio::test]
    async fn test_refresh_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(30));
        assert!(matches!(
            cache.refresh().await,
            Err(AuthError::JwksFetch(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[&KEY_A])))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::ZERO);
        cache.refresh().await.unwrap();

        // Issuer rotates to key B
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[&KEY_B])))
            .expect(1)
            .mount(&server)
            .await;

        assert!(cache.get_key(Some(KEY_B.kid), Algorithm::RS256).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_respects_cooldown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[&KEY_A])))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600));
        cache.refresh().await.unwrap();

        let result = cache.get_key(Some("unknown"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::KeyNotFound(kid)) if kid == "unknown"));
    }

    #[tokio::test]
    async fn test_refresh_task_runs_until_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[&KEY_A])))
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server, Duration::ZERO));
        let shutdown = tokio_util::sync::CancellationToken::new();
        let handle = JwksRefreshTask::new(Arc::clone(&cache), Duration::from_millis(50))
            .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(180)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let refreshes = server.received_requests().await.unwrap().len();
        assert!(refreshes >= 2, "expected periodic refreshes, got {refreshes}");
        assert_eq!(cache.keys_count(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), refreshes);
    }
}

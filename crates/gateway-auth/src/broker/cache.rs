//! Expiry-buffered access token cache

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::constants::EXPIRY_BUFFER;

/// Access token issued by the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    #[must_use]
    pub fn new(access_token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    /// Time left before the declared expiry
    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Servable only while more than `buffer` remains before expiry
    #[must_use]
    pub fn is_usable(&self, now: Instant, buffer: Duration) -> bool {
        self.expires_at > now + buffer
    }
}

/// Cache key for one broker operation.
///
/// Unpartitioned keys are `silent:{scope}` and `obo:{scopes}`. Partitioned
/// keys prefix the subject with its byte length, `{len}:{subject}|`, so tokens
/// never cross users whatever characters the subject or scopes contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn silent(subject: Option<&str>, scope: &str) -> Self {
        Self::build(subject, "silent", scope)
    }

    #[must_use]
    pub fn on_behalf_of(subject: Option<&str>, scopes: &str) -> Self {
        Self::build(subject, "obo", scopes)
    }

    fn build(subject: Option<&str>, kind: &str, scope: &str) -> Self {
        match subject {
            Some(subject) => Self(format!("{}:{subject}|{kind}:{scope}", subject.len())),
            None => Self(format!("{kind}:{scope}")),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token table owned by a single broker.
///
/// Entries are superseded in place and never evicted. Concurrent misses for
/// the same key may both fetch; the last write wins.
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, AccessToken>>,
    buffer: Duration,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.entries.read().len())
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(EXPIRY_BUFFER)
    }

    #[must_use]
    pub fn with_buffer(buffer: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            buffer,
        }
    }

    /// Cached token, unless it is within the expiry buffer
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<AccessToken> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|token| token.is_usable(Instant::now(), self.buffer))
            .cloned()
    }

    pub fn insert(&self, key: CacheKey, token: AccessToken) {
        self.entries.write().insert(key, token);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

//! Claim extraction and allowlist checks for verified assertions

use std::collections::HashSet;

use serde_json::Value;

/// Outcome of a successful assertion verification
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    /// Value of the configured user claim, trimmed
    pub user: String,
    /// Full verified payload
    pub claims: Value,
}

impl VerifiedAssertion {
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        email_claim(&self.claims)
    }

    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Non-empty trimmed string value of `name`
pub fn user_claim<'a>(claims: &'a Value, name: &str) -> Option<&'a str> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn email_claim(claims: &Value) -> Option<&str> {
    claims.get("email").and_then(Value::as_str)
}

/// `email` ends with `@domain` for one of the configured domains.
///
/// Domain comparison is case-sensitive.
pub fn email_domain_allowed(email: Option<&str>, domains: &HashSet<String>) -> bool {
    let Some(email) = email else {
        return false;
    };
    domains
        .iter()
        .any(|domain| email.ends_with(&format!("@{domain}")))
}

/// Case-insensitive membership; `allowed` holds lowercased entries.
pub fn email_allowed(email: Option<&str>, allowed: &HashSet<String>) -> bool {
    email.is_some_and(|e| allowed.contains(&e.trim().to_lowercase()))
}

//! Token broker error types

use thiserror::Error;

/// Per-request failures of the token broker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Client id, client secret or tenant id is missing
    #[error("token broker not configured: {0}")]
    NotConfigured(&'static str),

    #[error("token endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("token request failed: {0}")]
    Transport(String),
}

impl BrokerError {
    #[must_use]
    pub const fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }

    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedResponse(_))
    }

    /// Whether the caller may reasonably retry later.
    ///
    /// Missing configuration and client errors from the endpoint will not fix
    /// themselves.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NotConfigured(_) | Self::MalformedResponse(_) => false,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            Self::Transport(_) => true,
        }
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::Upstream { .. } => "upstream",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

use thiserror::Error;

use crate::auth::AuthError;
use crate::broker::BrokerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Auth(AuthError::Config(_)))
    }

    #[must_use]
    pub const fn is_broker(&self) -> bool {
        matches!(self, Self::Broker(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Downstream token brokering
//!
//! Turns a user's long-lived refresh credential into access tokens for
//! downstream APIs:
//!
//! - [`TokenBroker::acquire_silent`] - refresh-token grant for this
//!   application's own scope
//! - [`TokenBroker::exchange_on_behalf_of`] - jwt-bearer grant for the
//!   downstream scopes
//! - [`TokenBroker::acquire_downstream`] - both, in order; the entry point
//!   integrations should use
//!
//! Results are cached per scope set and never served within five minutes of
//! their expiry.
//!
//! # Multi-User Cache Safety
//!
//! Unpartitioned cache keys contain only the scopes. A broker serving more
//! than one end user must use [`TokenBroker::acquire_downstream_for`], which
//! adds the subject to every key.

mod cache;
mod client;
mod config;
mod error;

pub use cache::{AccessToken, CacheKey, TokenCache};
pub use client::TokenBroker;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};

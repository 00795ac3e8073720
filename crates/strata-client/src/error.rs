use thiserror::Error;

use strata_crypto::{CryptoError, KeyExchangeError};
use strata_net::NetError;
use strata_store::StoreError;
use strata_sync::SyncError;

/// Invalid or incomplete client configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Errors produced while setting up and running a session.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key exchange error: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

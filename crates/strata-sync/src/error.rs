use thiserror::Error;

use strata_crypto::{CryptoError, KeyExchangeError};
use strata_net::NetError;
use strata_store::StoreError;

/// Errors produced while applying sync payloads and paginating.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The store failed; the payload's transaction was rolled back.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Key exchange error: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The room has no timeline to paginate from.
    #[error("Room {0} has no timeline")]
    NoTimeline(String),

    /// The room is not known locally.
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    /// A local echo with this transaction id does not exist.
    #[error("Unknown local echo: {0}")]
    UnknownLocalEcho(String),

    #[error("Invalid event: {0}")]
    Event(#[from] strata_shared::EventError),
}

impl SyncError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Net(e) => e.is_transient(),
            SyncError::KeyExchange(KeyExchangeError::Net(e)) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use strata_net::NetError;
use strata_shared::keys::UiaChallenge;
use strata_shared::{DeviceId, SignatureError, UserId};
use strata_store::StoreError;

/// Failures of the local crypto machinery.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("No pairwise session with {0}")]
    MissingSession(String),

    #[error("Device {0} has no usable {1} key")]
    MissingDeviceKey(String, &'static str),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Typed failures of the key-exchange tasks. Callers decide what to do with
/// them; none is swallowed.
#[derive(Error, Debug)]
pub enum KeyExchangeError {
    /// Every requested device had run out of one-time keys.
    #[error("No one-time keys available for {} device(s)", .0.len())]
    NoOneTimeKeys(Vec<(UserId, DeviceId)>),

    /// The server wants interactive auth and no usable credentials were
    /// supplied.
    #[error("Interactive authentication required")]
    InteractiveAuthRequired(Box<UiaChallenge>),

    /// The single authenticated retry was rejected.
    #[error("Interactive authentication failed")]
    InteractiveAuthFailed(Box<UiaChallenge>),

    /// The request reached the server but failed for some users or servers.
    #[error("Partial failure for {} server(s)", failures.len())]
    PartialFailure { failures: BTreeMap<String, Value> },

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl KeyExchangeError {
    pub fn is_no_one_time_keys(&self) -> bool {
        matches!(self, KeyExchangeError::NoOneTimeKeys(_))
    }
}

pub type Result<T> = std::result::Result<T, KeyExchangeError>;

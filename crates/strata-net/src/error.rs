use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use strata_shared::constants::{M_LIMIT_EXCEEDED, M_MISSING_TOKEN, M_UNKNOWN_TOKEN};
use strata_shared::keys::UiaChallenge;

#[derive(Error, Debug)]
pub enum NetError {
    /// Connection, TLS or timeout failure before a response was read.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("Server error {status} ({errcode}): {message}")]
    Server {
        status: u16,
        errcode: String,
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// The server requires interactive authentication to proceed.
    #[error("Interactive authentication required")]
    InteractiveAuth(Box<UiaChallenge>),

    /// A response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    Url(String),
}

impl NetError {
    /// Worth retrying after a delay: connectivity problems, rate limiting and
    /// server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Network(_) => true,
            NetError::Server { status, errcode, .. } => {
                *status >= 500 || *status == 429 || errcode == M_LIMIT_EXCEEDED
            }
            _ => false,
        }
    }

    /// The access token is missing or no longer valid.
    pub fn is_token_error(&self) -> bool {
        matches!(self.errcode(), Some(M_UNKNOWN_TOKEN) | Some(M_MISSING_TOKEN))
    }

    pub fn errcode(&self) -> Option<&str> {
        match self {
            NetError::Server { errcode, .. } => Some(errcode),
            NetError::InteractiveAuth(challenge) => challenge.errcode.as_deref(),
            _ => None,
        }
    }

    /// Delay suggested by the server, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NetError::Server {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NetError::Decode(e.to_string())
        } else {
            NetError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Decode(e.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

/// Classify an error response from its status and body.
pub fn error_from_response(status: u16, body: &[u8]) -> NetError {
    if status == 401 {
        if let Ok(challenge) = serde_json::from_slice::<UiaChallenge>(body) {
            if !challenge.flows.is_empty() {
                return NetError::InteractiveAuth(Box::new(challenge));
            }
        }
    }

    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let (errcode, message, retry_after_ms) = match parsed {
        Some(b) => (
            b.errcode.unwrap_or_else(|| "M_UNKNOWN".into()),
            b.error.unwrap_or_default(),
            b.retry_after_ms,
        ),
        None => (
            "M_UNKNOWN".into(),
            String::from_utf8_lossy(body).into_owned(),
            None,
        ),
    };

    NetError::Server {
        status,
        errcode,
        message,
        retry_after_ms,
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, NetError>;

//! Client configuration loaded from environment variables.
//!
//! Everything except the account identity has a default, so a session can
//! start against a local homeserver with only the user, device and access
//! token set.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use strata_shared::constants::{
    DEFAULT_MAX_RETRY_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_SYNC_TIMEOUT_MS,
};
use strata_shared::{DeviceId, UserId};

use crate::error::ConfigError;

#[derive(Clone)]
pub struct ClientConfig {
    /// Env: `STRATA_HOMESERVER_URL`
    /// Default: `http://localhost:8008`
    pub homeserver_url: String,

    /// Env: `STRATA_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Env: `STRATA_USER_ID`
    pub user_id: Option<String>,

    /// Env: `STRATA_DEVICE_ID`
    pub device_id: Option<String>,

    /// Env: `STRATA_DATABASE_PATH`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Long-poll timeout of a caught-up sync request.
    /// Env: `STRATA_SYNC_TIMEOUT_MS`
    pub sync_timeout_ms: u64,

    /// Filter id or inline JSON filter passed with every sync request.
    /// Env: `STRATA_SYNC_FILTER`
    pub sync_filter: Option<String>,

    /// Env: `STRATA_REQUEST_TIMEOUT_MS`
    pub request_timeout_ms: u64,

    /// First backoff delay after a failed sync; doubles per attempt.
    /// Env: `STRATA_RETRY_DELAY_MS`
    pub retry_delay_ms: u64,

    /// Env: `STRATA_MAX_RETRY_DELAY_MS`
    pub max_retry_delay_ms: u64,

    /// Only used to answer an interactive-auth challenge when publishing
    /// cross-signing keys.
    /// Env: `STRATA_ACCOUNT_PASSWORD`
    pub account_password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            homeserver_url: "http://localhost:8008".to_string(),
            access_token: None,
            user_id: None,
            device_id: None,
            database_path: None,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            sync_filter: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            account_password: None,
        }
    }
}

// Secrets stay out of the logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("homeserver_url", &self.homeserver_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("database_path", &self.database_path)
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .field("sync_filter", &self.sync_filter)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("account_password", &self.account_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("STRATA_HOMESERVER_URL") {
            config.homeserver_url = url;
        }
        config.access_token = var("STRATA_ACCESS_TOKEN");
        config.user_id = var("STRATA_USER_ID");
        config.device_id = var("STRATA_DEVICE_ID");
        config.database_path = var("STRATA_DATABASE_PATH").map(PathBuf::from);
        config.sync_filter = var("STRATA_SYNC_FILTER");
        config.account_password = var("STRATA_ACCOUNT_PASSWORD");

        for (name, slot) in [
            ("STRATA_SYNC_TIMEOUT_MS", &mut config.sync_timeout_ms),
            ("STRATA_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms),
            ("STRATA_RETRY_DELAY_MS", &mut config.retry_delay_ms),
            ("STRATA_MAX_RETRY_DELAY_MS", &mut config.max_retry_delay_ms),
        ] {
            if let Some(value) = var(name) {
                match value.parse::<u64>() {
                    Ok(parsed) => *slot = parsed,
                    Err(_) => tracing::warn!(var = name, value = %value, "Invalid number, using default"),
                }
            }
        }

        config
    }

    /// Check that the identity is present and the homeserver URL usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.homeserver()?;
        self.user_id()?;
        self.device_id()?;
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ConfigError::Invalid {
                var: "STRATA_MAX_RETRY_DELAY_MS",
                reason: "smaller than STRATA_RETRY_DELAY_MS".into(),
            });
        }
        Ok(())
    }

    pub fn homeserver(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            var: "STRATA_HOMESERVER_URL",
            reason,
        };
        let url = Url::parse(&self.homeserver_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }

    pub fn user_id(&self) -> Result<UserId, ConfigError> {
        let raw = self
            .user_id
            .as_deref()
            .ok_or(ConfigError::Missing("STRATA_USER_ID"))?;
        UserId::parse(raw).map_err(|e| ConfigError::Invalid {
            var: "STRATA_USER_ID",
            reason: e.to_string(),
        })
    }

    pub fn device_id(&self) -> Result<DeviceId, ConfigError> {
        let raw = self
            .device_id
            .as_deref()
            .ok_or(ConfigError::Missing("STRATA_DEVICE_ID"))?;
        DeviceId::parse(raw).map_err(|e| ConfigError::Invalid {
            var: "STRATA_DEVICE_ID",
            reason: e.to_string(),
        })
    }

    pub fn access_token(&self) -> Result<&str, ConfigError> {
        self.access_token
            .as_deref()
            .ok_or(ConfigError::Missing("STRATA_ACCESS_TOKEN"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.homeserver_url, "http://localhost:8008");
        assert_eq!(config.sync_timeout_ms, 30_000);
        assert_eq!(config.retry_delay_ms, 10_000);
        assert_eq!(config.max_retry_delay_ms, 300_000);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = config(&[
            ("STRATA_HOMESERVER_URL", "https://matrix.example.org"),
            ("STRATA_SYNC_TIMEOUT_MS", "5000"),
            ("STRATA_RETRY_DELAY_MS", "soon"),
            ("STRATA_SYNC_FILTER", "42"),
            ("STRATA_ACCESS_TOKEN", ""),
        ]);
        assert_eq!(config.homeserver_url, "https://matrix.example.org");
        assert_eq!(config.sync_timeout_ms, 5000);
        assert_eq!(config.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
        assert_eq!(config.sync_filter.as_deref(), Some("42"));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_validate() {
        let valid = config(&[
            ("STRATA_USER_ID", "@me:example.org"),
            ("STRATA_DEVICE_ID", "PHONE"),
        ]);
        assert!(valid.validate().is_ok());

        let missing = config(&[("STRATA_USER_ID", "@me:example.org")]);
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::Missing("STRATA_DEVICE_ID"))
        ));

        let bad_user = config(&[("STRATA_USER_ID", "me"), ("STRATA_DEVICE_ID", "PHONE")]);
        assert!(matches!(
            bad_user.validate(),
            Err(ConfigError::Invalid { var: "STRATA_USER_ID", .. })
        ));

        let bad_scheme = config(&[
            ("STRATA_HOMESERVER_URL", "ftp://example.org"),
            ("STRATA_USER_ID", "@me:example.org"),
            ("STRATA_DEVICE_ID", "PHONE"),
        ]);
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::Invalid { var: "STRATA_HOMESERVER_URL", .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config(&[
            ("STRATA_ACCESS_TOKEN", "syt_secret"),
            ("STRATA_ACCOUNT_PASSWORD", "hunter2"),
        ]);
        let printed = format!("{config:?}");
        assert!(!printed.contains("syt_secret"));
        assert!(!printed.contains("hunter2"));
    }
}

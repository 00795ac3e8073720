//! The sync loop driver.
//!
//! One sync request is in flight at a time. A response is handed to the
//! [`SyncResponseHandler`], which persists the next token in the same
//! transaction as the payload, so a failed request or payload simply
//! repeats from the last committed token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use strata_crypto::KeyManager;
use strata_net::{NetError, SyncRequest, Transport};
use strata_store::SharedDatabase;
use strata_sync::{SyncError, SyncResponseHandler};

use crate::config::ClientConfig;

/// Where the loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Requesting,
    Processing,
    /// Waiting before the next attempt.
    Backoff(Duration),
    /// The homeserver rejected the access token. Terminal.
    InvalidToken,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SyncLoopConfig {
    pub timeout_ms: u64,
    pub filter: Option<String>,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl From<&ClientConfig> for SyncLoopConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            timeout_ms: config.sync_timeout_ms,
            filter: config.sync_filter.clone(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(max)
        .min(max)
}

pub struct SyncLoop {
    transport: Arc<dyn Transport>,
    db: SharedDatabase,
    handler: Arc<SyncResponseHandler>,
    key_manager: Option<Arc<KeyManager>>,
    config: SyncLoopConfig,
    state: watch::Sender<SyncState>,
}

impl SyncLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        db: SharedDatabase,
        handler: Arc<SyncResponseHandler>,
        config: SyncLoopConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            transport,
            db,
            handler,
            key_manager: None,
            config,
            state,
        }
    }

    /// Key maintenance runs after every processed response.
    pub fn with_key_manager(mut self, manager: Arc<KeyManager>) -> Self {
        self.key_manager = Some(manager);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        debug!(?state, "sync state");
        self.state.send_replace(state);
    }

    /// Sync until `shutdown` flips to true (or its sender is dropped), or the
    /// access token is rejected. Returns the terminal state. Store failures
    /// are returned as errors.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<SyncState, SyncError> {
        let mut timeout_ms = 0;
        let mut attempt: u32 = 0;

        let terminal = loop {
            if *shutdown.borrow() {
                break SyncState::Stopped;
            }

            let since = {
                let db = strata_store::lock(&self.db);
                let token = db.tables().sync_token()?;
                token
            };
            let is_initial_sync = since.is_none();
            let request = SyncRequest {
                since,
                timeout_ms: if is_initial_sync { 0 } else { timeout_ms },
                filter: self.config.filter.clone(),
                full_state: false,
            };

            self.set_state(SyncState::Requesting);
            debug!(since = ?request.since, timeout_ms = request.timeout_ms, "sync request");
            let result = tokio::select! {
                result = self.transport.sync(&request) => result,
                _ = shutdown.changed() => break SyncState::Stopped,
            };

            let error = match result {
                Ok(response) => {
                    self.set_state(SyncState::Processing);
                    match self.handler.handle_response(&response, is_initial_sync).await {
                        Ok(outcome) => {
                            attempt = 0;
                            // Pending to-device traffic is fetched right away.
                            timeout_ms = if response.has_to_device_events() {
                                0
                            } else {
                                self.config.timeout_ms
                            };
                            info!(
                                next_batch = %outcome.next_batch,
                                rooms = outcome.rooms.len(),
                                to_device = outcome.to_device_events,
                                "sync applied"
                            );
                            self.run_maintenance(&response.next_batch).await;
                            continue;
                        }
                        Err(SyncError::Net(e)) => e,
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "transient failure while applying sync");
                            NetError::Network(e.to_string())
                        }
                        Err(e) => {
                            error!(error = %e, "sync payload could not be applied");
                            self.set_state(SyncState::Stopped);
                            return Err(e);
                        }
                    }
                }
                Err(e) => e,
            };

            if error.is_token_error() {
                error!(error = %error, "access token rejected, stopping sync");
                break SyncState::InvalidToken;
            }

            let delay = error.retry_after().unwrap_or_else(|| {
                backoff_delay(attempt, self.config.retry_delay, self.config.max_retry_delay)
            });
            attempt = attempt.saturating_add(1);
            warn!(error = %error, attempt, delay_ms = delay.as_millis() as u64, "sync failed, backing off");
            self.set_state(SyncState::Backoff(delay));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break SyncState::Stopped,
            }
        };

        info!(state = ?terminal, "sync loop finished");
        self.set_state(terminal.clone());
        Ok(terminal)
    }

    async fn run_maintenance(&self, next_batch: &str) {
        if let Some(manager) = &self.key_manager {
            if let Err(e) = manager.run_maintenance(Some(next_batch)).await {
                warn!(error = %e, "key maintenance failed");
            }
        }
    }
}

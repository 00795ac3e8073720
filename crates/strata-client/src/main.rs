//! # strata-sync
//!
//! Headless sync client: keeps a local store in step with the homeserver
//! and logs incoming room events until interrupted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use strata_shared::{Event, RoomId};
use strata_sync::{Processors, RoomEventsMode, RoomEventsProcessor};

use strata_client::{ClientConfig, Session, SyncState};

/// Logs every delivered batch.
struct LogProcessor;

impl RoomEventsProcessor for LogProcessor {
    fn process(&self, mode: RoomEventsMode, room_id: &RoomId, events: &[Event]) {
        for event in events {
            info!(
                %mode,
                room_id = %room_id,
                event_id = %event.event_id,
                sender = %event.sender,
                event_type = event.clear_type(),
                undecryptable = event.decryption_error.is_some(),
                "room event"
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    strata_client::init_tracing();
    info!("Starting strata sync client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    config.validate()?;
    config.access_token()?;
    info!(?config, "Loaded configuration");

    let mut processors = Processors::new();
    processors.register(Arc::new(LogProcessor));
    let session = Session::open(config.clone(), processors)?;

    // Publish keys before the first sync so that others can reach us.
    if let Err(e) = session.key_manager().run_maintenance(None).await {
        warn!(error = %e, "initial key maintenance failed");
    }
    if config.account_password.is_some() {
        if let Err(e) = session.key_manager().bootstrap_cross_signing().await {
            warn!(error = %e, "cross-signing bootstrap failed");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                // The loop may already be gone.
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                // Dropping the sender would stop the loop.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    match session.sync_loop().run(shutdown_rx).await? {
        SyncState::InvalidToken => anyhow::bail!("the access token was rejected by the homeserver"),
        state => info!(?state, "sync stopped"),
    }
    Ok(())
}

//! Locally created events.
//!
//! An echo is stored as soon as the user sends something so it can be shown
//! right away. Its send state moves `sending` -> `sent` (or `undelivered`),
//! and the echo is removed when the server-confirmed event with the same
//! transaction id is merged into the timeline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use strata_crypto::{CryptoService, KeyManager};
use strata_net::Transport;
use strata_shared::constants::EVENT_ROOM_ENCRYPTED;
use strata_shared::{
    Event, EventError, EventId, RoomId, SendState, TransactionId, UnsignedData, UserId,
};
use strata_store::{LocalEcho, SharedDatabase};

use crate::error::{Result, SyncError};
use crate::processors::{Processors, RoomEventsMode};
use crate::room::encryption_recipients;

pub struct LocalEchoes {
    db: SharedDatabase,
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn CryptoService>,
    key_manager: Option<Arc<KeyManager>>,
    own_user: UserId,
    processors: Processors,
}

impl LocalEchoes {
    pub fn new(
        db: SharedDatabase,
        transport: Arc<dyn Transport>,
        crypto: Arc<dyn CryptoService>,
        own_user: UserId,
        processors: Processors,
    ) -> Self {
        Self {
            db,
            transport,
            crypto,
            key_manager: None,
            own_user,
            processors,
        }
    }

    /// Room keys of encrypted rooms are shared through `manager` before a
    /// send.
    pub fn with_key_manager(mut self, manager: Arc<KeyManager>) -> Self {
        self.key_manager = Some(manager);
        self
    }

    /// Store a new echo in the `sending` state and hand it to processors.
    pub fn create(&self, room_id: &RoomId, event_type: &str, content: Value) -> Result<LocalEcho> {
        let echo = LocalEcho {
            transaction_id: TransactionId::generate(),
            room_id: room_id.clone(),
            event_type: event_type.to_string(),
            sender: self.own_user.clone(),
            content,
            send_state: SendState::Sending,
            created_at: Utc::now(),
        };

        {
            let db = strata_store::lock(&self.db);
            let tables = db.tables();
            if tables.membership(room_id)?.is_none() {
                return Err(SyncError::UnknownRoom(room_id.to_string()));
            }
            tables.insert_local_echo(&echo)?;
        }
        debug!(room_id = %room_id, txn_id = %echo.transaction_id, event_type, "created local echo");

        let event = echo_event(&echo)?;
        self.processors
            .notify(RoomEventsMode::LocalEcho, room_id, std::slice::from_ref(&event));
        Ok(echo)
    }

    pub fn update_send_state(&self, transaction_id: &TransactionId, state: SendState) -> Result<()> {
        let db = strata_store::lock(&self.db);
        if !db.tables().update_send_state(transaction_id.as_str(), state)? {
            return Err(SyncError::UnknownLocalEcho(transaction_id.to_string()));
        }
        Ok(())
    }

    /// Pending echoes of a room, oldest first.
    pub fn pending(&self, room_id: &RoomId) -> Result<Vec<LocalEcho>> {
        let db = strata_store::lock(&self.db);
        let echoes = db.tables().local_echoes(room_id)?;
        Ok(echoes)
    }

    /// Send an echo to the server, encrypting it first in an encrypted room.
    /// The echo ends up `sent` or, on any failure, `undelivered`.
    pub async fn send(&self, transaction_id: &TransactionId) -> Result<EventId> {
        let stored = {
            let db = strata_store::lock(&self.db);
            let tables = db.tables();
            tables.get_local_echo(transaction_id.as_str())?
        };
        let echo = stored.ok_or_else(|| SyncError::UnknownLocalEcho(transaction_id.to_string()))?;

        // Sync may merge the server event, and drop the echo, before the
        // send returns. A missing echo is not a send failure.
        match self.deliver(&echo).await {
            Ok(event_id) => {
                match self.update_send_state(transaction_id, SendState::Sent) {
                    Ok(()) | Err(SyncError::UnknownLocalEcho(_)) => {}
                    Err(e) => return Err(e),
                }
                info!(room_id = %echo.room_id, txn_id = %transaction_id, event_id = %event_id, "event sent");
                Ok(event_id)
            }
            Err(e) => {
                warn!(room_id = %echo.room_id, txn_id = %transaction_id, error = %e, "event undelivered");
                if let Err(state_error) = self.update_send_state(transaction_id, SendState::Undelivered) {
                    debug!(txn_id = %transaction_id, error = %state_error, "could not mark echo undelivered");
                }
                Err(e)
            }
        }
    }

    async fn deliver(&self, echo: &LocalEcho) -> Result<EventId> {
        if !self.crypto.is_room_encrypted(&echo.room_id) {
            let event_id = self
                .transport
                .send_event(&echo.room_id, &echo.event_type, &echo.transaction_id, &echo.content)
                .await?;
            return Ok(event_id);
        }

        match &self.key_manager {
            Some(manager) => {
                let recipients = {
                    let db = strata_store::lock(&self.db);
                    encryption_recipients(db.tables(), &echo.room_id)?
                };
                let missing = manager.share_room_key(&echo.room_id, &recipients).await?;
                let unreachable = missing.no_one_time_key.len() + missing.invalid_one_time_key.len();
                if unreachable > 0 {
                    warn!(room_id = %echo.room_id, devices = unreachable, "room key not shared with every device");
                }
            }
            None => debug!(room_id = %echo.room_id, "no key manager, room key not shared"),
        }

        let encrypted = self
            .crypto
            .encrypt_room_event(&echo.room_id, &echo.event_type, &echo.content)
            .await?;
        let event_id = self
            .transport
            .send_event(&echo.room_id, EVENT_ROOM_ENCRYPTED, &echo.transaction_id, &encrypted)
            .await?;
        Ok(event_id)
    }
}

/// The timeline form of an echo. Its id is local; the transaction id links
/// it to the event the server eventually returns.
pub fn echo_event(echo: &LocalEcho) -> Result<Event> {
    let event_id = EventId::parse(format!("$local.{}", echo.transaction_id))
        .map_err(EventError::from)?;
    Ok(Event {
        event_id,
        room_id: echo.room_id.clone(),
        event_type: echo.event_type.clone(),
        sender: echo.sender.clone(),
        origin_server_ts: echo.created_at.timestamp_millis(),
        state_key: None,
        content: echo.content.clone(),
        unsigned: UnsignedData {
            transaction_id: Some(echo.transaction_id.to_string()),
            ..UnsignedData::default()
        },
        redacts: None,
        decryption: None,
        decryption_error: None,
    })
}

//! Top-level handling of one sync response.
//!
//! Applying a response runs in three phases:
//!
//! 1. to-device events are decrypted (room keys imported first), then the
//!    timeline events of joined rooms, without holding the store;
//! 2. every room section, global account data, device-list changes and the
//!    new sync token are written in one transaction. Any error rolls the
//!    whole payload back;
//! 3. processors are notified and events waiting for a room key that just
//!    arrived are decrypted retroactively.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_crypto::{handle_device_list_changes, track_users, CryptoService, KeyManager};
use strata_shared::sync::SyncResponse;
use strata_shared::{Membership, RoomId, UserId};
use strata_store::{SharedDatabase, Tables};

use crate::account_data::apply_global_account_data;
use crate::crypto_sync::CryptoSyncHandler;
use crate::error::Result;
use crate::locks::RoomLocks;
use crate::processors::{Processors, RoomEventsMode};
use crate::room::{encryption_recipients, RoomOutcome, RoomSyncHandler, RoomUpdate};
use crate::verification::VerificationTracker;

/// What one response changed.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub next_batch: String,
    pub rooms: Vec<RoomOutcome>,
    pub to_device_events: usize,
    pub imported_keys: usize,
    pub retro_decrypted: usize,
}

pub struct SyncResponseHandler {
    db: SharedDatabase,
    rooms: RoomSyncHandler,
    crypto_sync: CryptoSyncHandler,
    key_manager: Option<Arc<KeyManager>>,
    room_locks: RoomLocks,
    processors: Processors,
}

impl SyncResponseHandler {
    pub fn new(
        db: SharedDatabase,
        crypto: Arc<dyn CryptoService>,
        verification: Arc<VerificationTracker>,
        own_user: UserId,
        room_locks: RoomLocks,
        processors: Processors,
    ) -> Self {
        Self {
            rooms: RoomSyncHandler::new(crypto.clone(), own_user),
            crypto_sync: CryptoSyncHandler::new(crypto, db.clone(), verification),
            db,
            key_manager: None,
            room_locks,
            processors,
        }
    }

    /// One-time key counts from each response are forwarded to `manager`.
    pub fn with_key_manager(mut self, manager: Arc<KeyManager>) -> Self {
        self.key_manager = Some(manager);
        self
    }

    pub fn crypto_sync(&self) -> &CryptoSyncHandler {
        &self.crypto_sync
    }

    pub fn processors(&self) -> &Processors {
        &self.processors
    }

    pub async fn handle_response(&self, response: &SyncResponse, is_initial_sync: bool) -> Result<SyncOutcome> {
        // -- phase 1: decryption ------------------------------------------
        let to_device = self
            .crypto_sync
            .handle_to_device(&response.to_device.events)
            .await;

        let mut updates = room_updates(response);
        let context_id = Uuid::new_v4().to_string();
        for (room_id, update) in updates.iter_mut() {
            if let Some(events) = update.timeline_events_mut() {
                self.crypto_sync.decrypt_events(room_id, events, &context_id).await?;
            }
        }

        // -- phase 2: one transaction -------------------------------------
        let _guards = self
            .room_locks
            .lock_all(updates.iter().map(|(room_id, _)| room_id))
            .await;
        let rooms = self.persist(response, &updates, is_initial_sync)?;

        // -- phase 3: notification ----------------------------------------
        if let Some(manager) = &self.key_manager {
            manager.update_one_time_key_counts(&response.device_one_time_keys_count);
        }

        let mode = if is_initial_sync {
            RoomEventsMode::InitialSync
        } else {
            RoomEventsMode::IncrementalSync
        };
        for outcome in &rooms {
            self.processors.notify(mode, &outcome.room_id, &outcome.events);
        }

        let mut retro_decrypted = 0;
        if !to_device.imported_keys.is_empty() {
            match self.crypto_sync.retry_decryption(&to_device.imported_keys).await {
                Ok(recovered) => {
                    for (room_id, events) in recovered {
                        retro_decrypted += events.len();
                        self.processors
                            .notify(RoomEventsMode::IncrementalSync, &room_id, &events);
                    }
                }
                Err(e) => warn!(error = %e, "retroactive decryption failed"),
            }
        }

        info!(
            next_batch = %response.next_batch,
            rooms = rooms.len(),
            to_device = to_device.events.len(),
            initial = is_initial_sync,
            "processed sync response"
        );

        Ok(SyncOutcome {
            next_batch: response.next_batch.clone(),
            rooms,
            to_device_events: to_device.events.len(),
            imported_keys: to_device.imported_keys.len(),
            retro_decrypted,
        })
    }

    fn persist(
        &self,
        response: &SyncResponse,
        updates: &[(RoomId, RoomUpdate)],
        is_initial_sync: bool,
    ) -> Result<Vec<RoomOutcome>> {
        let mut db = strata_store::lock(&self.db);
        let txn = db.transaction()?;
        let tables = txn.tables();

        let mut outcomes = Vec::with_capacity(updates.len());
        for (room_id, update) in updates {
            outcomes.push(self.rooms.handle(tables, room_id, update, is_initial_sync)?);
        }

        apply_global_account_data(tables, &response.account_data.events)?;
        handle_device_list_changes(
            tables,
            &response.device_lists.changed,
            &response.device_lists.left,
        )?;
        for outcome in &outcomes {
            self.track_room_members(tables, outcome)?;
        }

        tables.save_sync_token(&response.next_batch)?;
        txn.commit()?;
        Ok(outcomes)
    }

    /// Members of encrypted rooms need their device lists.
    fn track_room_members(&self, tables: Tables<'_>, outcome: &RoomOutcome) -> Result<()> {
        if outcome.membership != Membership::Joined
            || !(outcome.members_changed || outcome.encryption_enabled)
            || !self.rooms.crypto().is_room_encrypted(&outcome.room_id)
        {
            return Ok(());
        }

        let members = encryption_recipients(tables, &outcome.room_id)?;
        let added = track_users(tables, &members)?;
        if added > 0 {
            debug!(room_id = %outcome.room_id, added, "tracking device lists of room members");
        }
        Ok(())
    }
}

/// Room sections of a response in a fixed order: left, invited, joined.
fn room_updates(response: &SyncResponse) -> Vec<(RoomId, RoomUpdate)> {
    let rooms = &response.rooms;
    let mut updates = Vec::with_capacity(response.room_count());

    let mut push = |id: &str, build: &dyn Fn(&RoomId) -> RoomUpdate| match RoomId::parse(id) {
        Ok(room_id) => {
            let update = build(&room_id);
            updates.push((room_id, update));
        }
        Err(e) => warn!(room_id = id, error = %e, "skipping room with malformed id"),
    };

    for (id, room) in &rooms.leave {
        push(id, &|room_id| RoomUpdate::left(room_id, room));
    }
    for (id, room) in &rooms.invite {
        push(id, &|room_id| RoomUpdate::invited(room_id, room));
    }
    for (id, room) in &rooms.join {
        push(id, &|room_id| RoomUpdate::joined(room_id, room));
    }
    updates
}

//! Shared fixtures for the sync integration tests: a device with its own
//! store and crypto service, and builders for sync payload JSON.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use strata_crypto::account::lock_account;
use strata_crypto::{CryptoService, LocalCryptoService};
use strata_shared::constants::EVENT_ROOM_KEY;
use strata_shared::keys::DeviceKeys;
use strata_shared::sync::SyncResponse;
use strata_shared::{DeviceId, RoomId, UserId};
use strata_store::{Database, SharedDatabase};
use strata_sync::{
    ChannelProcessor, Processors, RoomEventsUpdate, RoomLocks, SyncResponseHandler,
    VerificationTracker,
};

pub const ROOM: &str = "!garden:example.org";

pub fn room() -> RoomId {
    RoomId::parse(ROOM).unwrap()
}

/// One logged-in device.
pub struct Device {
    pub user_id: UserId,
    pub db: SharedDatabase,
    pub crypto: Arc<LocalCryptoService>,
    pub handler: SyncResponseHandler,
    pub updates: UnboundedReceiver<RoomEventsUpdate>,
}

pub fn device(user: &str, device: &str) -> Device {
    let user_id = UserId::parse(user).unwrap();
    let device_id = DeviceId::parse(device).unwrap();
    let db = Database::open_in_memory().unwrap().into_shared();
    let account = LocalCryptoService::load_account(&db, &user_id, &device_id).unwrap();
    let crypto = Arc::new(LocalCryptoService::new(db.clone(), account).unwrap());

    let mut processors = Processors::new();
    let (channel, updates) = ChannelProcessor::new();
    processors.register(Arc::new(channel));

    let handler = SyncResponseHandler::new(
        db.clone(),
        crypto.clone(),
        Arc::new(VerificationTracker::new(user_id.clone(), device_id)),
        user_id.clone(),
        RoomLocks::new(),
        processors,
    );
    Device {
        user_id,
        db,
        crypto,
        handler,
        updates,
    }
}

impl Device {
    pub fn drain_updates(&mut self) -> Vec<RoomEventsUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Event ids of the room's live chunk, in display order.
    pub fn timeline(&self) -> Vec<String> {
        let db = strata_store::lock(&self.db);
        let tables = db.tables();
        let Some(live) = tables.live_chunk(&room()).unwrap() else {
            return Vec::new();
        };
        tables
            .chunk_events(live.chunk_id)
            .unwrap()
            .into_iter()
            .map(|e| e.event.event_id.to_string())
            .collect()
    }
}

// -- payload builders ------------------------------------------------------

pub fn message(id: &str, sender: &str, body: &str) -> Value {
    json!({
        "event_id": id,
        "type": "m.room.message",
        "sender": sender,
        "origin_server_ts": 1_000,
        "content": { "msgtype": "m.text", "body": body }
    })
}

pub fn state(id: &str, event_type: &str, state_key: &str, sender: &str, content: Value) -> Value {
    json!({
        "event_id": id,
        "type": event_type,
        "state_key": state_key,
        "sender": sender,
        "origin_server_ts": 1_000,
        "content": content
    })
}

pub fn member(id: &str, user: &str, membership: &str) -> Value {
    state(id, "m.room.member", user, user, json!({ "membership": membership }))
}

pub fn encrypted(id: &str, sender: &str, content: Value) -> Value {
    json!({
        "event_id": id,
        "type": "m.room.encrypted",
        "sender": sender,
        "origin_server_ts": 1_000,
        "content": content
    })
}

/// A response whose `rooms.join` holds `ROOM` with the given sections.
pub fn joined(next_batch: &str, room: Value) -> SyncResponse {
    response(json!({
        "next_batch": next_batch,
        "rooms": { "join": { ROOM: room } }
    }))
}

pub fn response(value: Value) -> SyncResponse {
    serde_json::from_value(value).unwrap()
}

// -- key exchange ----------------------------------------------------------

/// `sender` opens a pairwise channel to `receiver` with one of its one-time
/// keys. Returns the receiver's device keys.
pub async fn connect(sender: &LocalCryptoService, receiver: &LocalCryptoService) -> DeviceKeys {
    let (keys, one_time_key) = {
        let mut account = lock_account(receiver.account());
        account.generate_one_time_keys(1);
        let otks = account.unpublished_one_time_keys().unwrap();
        account.mark_keys_as_published();
        (
            account.device_keys().unwrap(),
            otks.into_values().next().unwrap(),
        )
    };
    sender.create_session(&keys, one_time_key.key()).await.unwrap();
    keys
}

/// The to-device event carrying `sender`'s outbound room key for `ROOM`.
pub async fn room_key_event(sender: &LocalCryptoService, sender_id: &str, receiver: &DeviceKeys) -> Value {
    let key = sender.room_key_content(&room()).await.unwrap();
    let content = sender
        .encrypt_to_device(receiver, EVENT_ROOM_KEY, &key)
        .await
        .unwrap();
    json!({ "type": "m.room.encrypted", "sender": sender_id, "content": content })
}

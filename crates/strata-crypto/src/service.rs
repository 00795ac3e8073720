//! The crypto service seam consumed by the sync engine.

use async_trait::async_trait;
use serde_json::Value;

use strata_shared::keys::DeviceKeys;
use strata_shared::{DecryptionError, DecryptionResult, Event, RoomId, ToDeviceEvent};

use crate::error::CryptoError;

/// A room key that became available, making retroactive decryption of that
/// session's events possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedRoomKey {
    pub room_id: RoomId,
    pub session_id: String,
}

/// Session-establishment and ratchet primitives.
///
/// The synchronous methods are called while the sync handler holds the
/// store, so implementations must answer from memory and never touch the
/// database from them. Decrypt and encrypt operations may run concurrently.
#[async_trait]
pub trait CryptoService: Send + Sync {
    /// Decrypt a room event. `context_id` identifies the caller's pass so
    /// replays within one pass can be told apart from legitimate repeats.
    async fn decrypt(&self, event: &Event, context_id: &str)
        -> Result<DecryptionResult, DecryptionError>;

    async fn decrypt_to_device(
        &self,
        event: &ToDeviceEvent,
        context_id: &str,
    ) -> Result<DecryptionResult, DecryptionError>;

    fn is_room_encrypted(&self, room_id: &RoomId) -> bool;

    /// A state event from the `state` section of a room.
    fn on_state_event(&self, room_id: &RoomId, event: &Event);

    /// A timeline event, after insertion.
    fn on_live_event(&self, room_id: &RoomId, event: &Event);

    /// A to-device event once decrypted. Returns the room key it carried,
    /// if it imported one.
    async fn on_to_device_event(&self, event: &ToDeviceEvent) -> Option<ImportedRoomKey>;

    fn has_session_with(&self, curve25519_key: &str) -> bool;

    /// Establish a pairwise session from a freshly claimed one-time key.
    async fn create_session(&self, device: &DeviceKeys, one_time_key: &str)
        -> Result<(), CryptoError>;

    /// Encrypt a to-device payload for one device over its pairwise session.
    async fn encrypt_to_device(
        &self,
        device: &DeviceKeys,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError>;

    /// Content of the `m.room_key` event sharing the room's current outbound
    /// session.
    async fn room_key_content(&self, room_id: &RoomId) -> Result<Value, CryptoError>;

    /// Encrypt a room event with the room's outbound session.
    async fn encrypt_room_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError>;
}

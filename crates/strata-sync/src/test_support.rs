//! Scripted collaborators for the handler tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use strata_crypto::{CryptoError, CryptoService, ImportedRoomKey};
use strata_net::{MessagesRequest, NetError, Result as NetResult, SyncRequest, Transport};
use strata_shared::constants::{EVENT_ROOM_ENCRYPTION, EVENT_ROOM_KEY};
use strata_shared::keys::{
    DeviceKeys, KeyChangesResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest,
    KeysQueryResponse, KeysUploadRequest, KeysUploadResponse, SendToDeviceRequest,
    SigningKeysUploadRequest,
};
use strata_shared::sync::{MessagesResponse, SyncResponse};
use strata_shared::{
    DecryptionError, DecryptionErrorKind, DecryptionResult, Event, EventId, RoomId, ToDeviceEvent,
    TransactionId,
};

/// Ciphertext is the clear event itself; a session id decrypts once it was
/// added.
#[derive(Default)]
pub struct FakeCrypto {
    sessions: Mutex<HashSet<String>>,
    encrypted_rooms: Mutex<HashSet<RoomId>>,
    decrypt_calls: AtomicUsize,
}

impl FakeCrypto {
    pub fn add_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().insert(session_id.to_string());
    }

    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

fn clear_result(ciphertext: &Value) -> DecryptionResult {
    DecryptionResult {
        clear_event: ciphertext.clone(),
        sender_curve25519_key: "sender-curve".into(),
        claimed_ed25519_key: None,
        forwarding_curve25519_key_chain: Vec::new(),
    }
}

#[async_trait]
impl CryptoService for FakeCrypto {
    async fn decrypt(&self, event: &Event, _context_id: &str) -> Result<DecryptionResult, DecryptionError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        let session_id = event.content["session_id"].as_str().unwrap_or_default();
        if !self.sessions.lock().unwrap().contains(session_id) {
            return Err(DecryptionError::new(
                DecryptionErrorKind::UnknownInboundSession,
                "unknown session",
            )
            .with_session(session_id));
        }
        Ok(clear_result(&event.content["ciphertext"]))
    }

    async fn decrypt_to_device(
        &self,
        event: &ToDeviceEvent,
        _context_id: &str,
    ) -> Result<DecryptionResult, DecryptionError> {
        let ciphertext = &event.content["ciphertext"];
        if ciphertext.get("type").is_none() {
            return Err(DecryptionError::new(DecryptionErrorKind::BadEncryptedMessage, "garbage"));
        }
        Ok(clear_result(ciphertext))
    }

    fn is_room_encrypted(&self, room_id: &RoomId) -> bool {
        self.encrypted_rooms.lock().unwrap().contains(room_id)
    }

    fn on_state_event(&self, room_id: &RoomId, event: &Event) {
        if event.event_type == EVENT_ROOM_ENCRYPTION {
            self.encrypted_rooms.lock().unwrap().insert(room_id.clone());
        }
    }

    fn on_live_event(&self, room_id: &RoomId, event: &Event) {
        self.on_state_event(room_id, event);
    }

    async fn on_to_device_event(&self, event: &ToDeviceEvent) -> Option<ImportedRoomKey> {
        if event.clear_type() != EVENT_ROOM_KEY {
            return None;
        }
        let content = event.clear_content();
        let room_id = RoomId::parse(content["room_id"].as_str()?).ok()?;
        let session_id = content["session_id"].as_str()?.to_string();
        self.add_session(&session_id);
        Some(ImportedRoomKey { room_id, session_id })
    }

    fn has_session_with(&self, _curve25519_key: &str) -> bool {
        false
    }

    async fn create_session(&self, _device: &DeviceKeys, _one_time_key: &str) -> Result<(), CryptoError> {
        Ok(())
    }

    async fn encrypt_to_device(
        &self,
        _device: &DeviceKeys,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError> {
        Ok(json!({ "algorithm": "fake", "ciphertext": { "type": event_type, "content": content } }))
    }

    async fn room_key_content(&self, room_id: &RoomId) -> Result<Value, CryptoError> {
        Ok(json!({ "room_id": room_id, "session_id": "outbound" }))
    }

    async fn encrypt_room_event(
        &self,
        _room_id: &RoomId,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError> {
        Ok(json!({
            "algorithm": "fake",
            "session_id": "outbound",
            "ciphertext": { "type": event_type, "content": content }
        }))
    }
}

/// An encrypted room event whose plaintext is `{ "body": body }`.
pub fn encrypted_event(id: &str, session_id: &str, body: &str, redacted: bool) -> Event {
    let mut raw = json!({
        "event_id": id,
        "type": "m.room.encrypted",
        "sender": "@bob:example.org",
        "origin_server_ts": 1_000,
        "content": {
            "algorithm": "fake",
            "sender_key": "bob-curve",
            "session_id": session_id,
            "ciphertext": { "type": "m.room.message", "content": { "body": body } }
        }
    });
    if redacted {
        raw["content"] = json!({});
        raw["unsigned"] = json!({ "redacted_because": { "type": "m.room.redaction" } });
    }
    Event::from_raw(&raw, &RoomId::parse("!r:example.org").unwrap()).unwrap()
}

/// An encrypted to-device `m.room_key` for `session_id`.
pub fn room_key_to_device(room_id: &RoomId, session_id: &str) -> Value {
    json!({
        "type": "m.room.encrypted",
        "sender": "@bob:example.org",
        "content": {
            "algorithm": "fake",
            "ciphertext": {
                "type": "m.room_key",
                "content": { "room_id": room_id, "session_id": session_id }
            }
        }
    })
}

/// Answers `/messages` and `/send` from queues; key endpoints succeed empty.
#[derive(Default)]
pub struct FakeTransport {
    messages: Mutex<VecDeque<NetResult<MessagesResponse>>>,
    sends: Mutex<VecDeque<NetResult<EventId>>>,
    message_requests: Mutex<Vec<MessagesRequest>>,
    sent: Mutex<Vec<(RoomId, String, String, Value)>>,
    on_send: Mutex<Option<SendHook>>,
}

type SendHook = Box<dyn Fn(&TransactionId) + Send + Sync>;

impl FakeTransport {
    pub fn push_messages(&self, r: NetResult<MessagesResponse>) {
        self.messages.lock().unwrap().push_back(r);
    }

    pub fn push_send(&self, r: NetResult<EventId>) {
        self.sends.lock().unwrap().push_back(r);
    }

    pub fn message_requests(&self) -> Vec<MessagesRequest> {
        self.message_requests.lock().unwrap().clone()
    }

    /// Run `hook` inside every `/send`, before its result is returned.
    pub fn on_send(&self, hook: impl Fn(&TransactionId) + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    /// `(room, event type, txn id, content)` of every send.
    pub fn sent(&self) -> Vec<(RoomId, String, String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn sync(&self, _request: &SyncRequest) -> NetResult<SyncResponse> {
        Err(NetError::Network("sync is not scripted".into()))
    }

    async fn upload_keys(&self, _request: &KeysUploadRequest) -> NetResult<KeysUploadResponse> {
        Ok(KeysUploadResponse::default())
    }

    async fn claim_keys(&self, _request: &KeysClaimRequest) -> NetResult<KeysClaimResponse> {
        Ok(KeysClaimResponse::default())
    }

    async fn query_keys(&self, _request: &KeysQueryRequest) -> NetResult<KeysQueryResponse> {
        Ok(KeysQueryResponse::default())
    }

    async fn key_changes(&self, _from: &str, _to: &str) -> NetResult<KeyChangesResponse> {
        Ok(KeyChangesResponse::default())
    }

    async fn send_to_device(
        &self,
        _event_type: &str,
        _txn_id: &TransactionId,
        _request: &SendToDeviceRequest,
    ) -> NetResult<()> {
        Ok(())
    }

    async fn upload_signing_keys(&self, _request: &SigningKeysUploadRequest) -> NetResult<()> {
        Ok(())
    }

    async fn room_messages(&self, request: &MessagesRequest) -> NetResult<MessagesResponse> {
        self.message_requests.lock().unwrap().push(request.clone());
        self.messages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(NetError::Network("messages are not scripted".into())))
    }

    async fn send_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        txn_id: &TransactionId,
        content: &Value,
    ) -> NetResult<EventId> {
        self.sent.lock().unwrap().push((
            room_id.clone(),
            event_type.to_string(),
            txn_id.to_string(),
            content.clone(),
        ));
        if let Some(hook) = self.on_send.lock().unwrap().as_ref() {
            hook(txn_id);
        }
        self.sends
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EventId::parse(format!("$sent-{txn_id}")).unwrap()))
    }
}

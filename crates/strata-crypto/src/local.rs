//! [`CryptoService`] backed by the local account and the store.
//!
//! Group messages use one symmetric key per room session; pairwise messages
//! use a channel key agreed from the sender's identity key and one of the
//! recipient's one-time keys.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use strata_shared::constants::{
    EVENT_FORWARDED_ROOM_KEY, EVENT_ROOM_ENCRYPTION, EVENT_ROOM_KEY,
};
use strata_shared::keys::DeviceKeys;
use strata_shared::signing::{decode_b64, encode_b64};
use strata_shared::{
    DecryptionError, DecryptionErrorKind, DecryptionResult, DeviceId, EncryptedContent, Event,
    EventId, Membership, RoomId, ToDeviceEvent, UserId,
};
use strata_store::{InboundGroupSessionRecord, SharedDatabase, Tables};

use crate::account::{lock_account, save_account, Account, SharedAccount};
use crate::cipher::{self, SymmetricKey};
use crate::error::CryptoError;
use crate::service::{CryptoService, ImportedRoomKey};
use crate::{LOCAL_GROUP_ALGORITHM, LOCAL_OLM_ALGORITHM};

/// Prekey message: carries the one-time key the channel was built on.
const MESSAGE_TYPE_PREKEY: u64 = 0;
const MESSAGE_TYPE_NORMAL: u64 = 1;

struct OutboundGroupSession {
    session_id: String,
    key: SymmetricKey,
}

#[derive(Default)]
struct ReplayGuard {
    context_id: String,
    seen: HashMap<[u8; 32], EventId>,
}

pub struct LocalCryptoService {
    account: SharedAccount,
    db: SharedDatabase,
    encrypted_rooms: Mutex<HashSet<RoomId>>,
    outbound: Mutex<HashMap<RoomId, OutboundGroupSession>>,
    inbound: Mutex<HashMap<(RoomId, String), InboundGroupSessionRecord>>,
    replay: Mutex<ReplayGuard>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bad_message(message: impl Into<String>) -> DecryptionError {
    DecryptionError::new(DecryptionErrorKind::BadEncryptedMessage, message)
}

fn other(e: impl std::fmt::Display) -> DecryptionError {
    DecryptionError::new(DecryptionErrorKind::Other, e.to_string())
}

fn decode_key(b64: &str) -> Result<SymmetricKey, CryptoError> {
    decode_b64(b64)?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("session key".into()))
}

impl LocalCryptoService {
    pub fn new(db: SharedDatabase, account: SharedAccount) -> Result<Self, CryptoError> {
        // Seed the encrypted-room set so the synchronous hooks never need
        // the store.
        let encrypted: HashSet<RoomId> = {
            let db = strata_store::lock(&db);
            let tables = db.tables();
            let mut rooms = HashSet::new();
            for membership in [Membership::Joined, Membership::Invited, Membership::Left] {
                rooms.extend(
                    tables
                        .rooms_with_membership(membership)?
                        .into_iter()
                        .filter(|s| s.is_encrypted)
                        .map(|s| s.room_id),
                );
            }
            rooms
        };

        Ok(Self {
            account,
            db,
            encrypted_rooms: Mutex::new(encrypted),
            outbound: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            replay: Mutex::new(ReplayGuard::default()),
        })
    }

    /// Load the device account from the store, creating and persisting a
    /// fresh one on first run.
    pub fn load_account(
        db: &SharedDatabase,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<SharedAccount, CryptoError> {
        let db = strata_store::lock(db);
        let tables = db.tables();
        let account = match tables.account_pickle()? {
            Some(pickle) => {
                let account = Account::from_pickle(serde_json::from_str(&pickle)?);
                if account.user_id() != user_id || account.device_id() != device_id {
                    return Err(CryptoError::InvalidKey(format!(
                        "stored account belongs to {} {}",
                        account.user_id(),
                        account.device_id()
                    )));
                }
                account
            }
            None => {
                info!(user_id = %user_id, device_id = %device_id, "creating device account");
                let account = Account::generate(user_id.clone(), device_id.clone());
                tables.save_account_pickle(&serde_json::to_string(&account.pickle())?)?;
                account
            }
        };
        Ok(std::sync::Arc::new(Mutex::new(account)))
    }

    pub fn account(&self) -> &SharedAccount {
        &self.account
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    fn with_tables<T>(
        &self,
        f: impl FnOnce(Tables<'_>) -> strata_store::Result<T>,
    ) -> Result<T, CryptoError> {
        let db = strata_store::lock(&self.db);
        Ok(f(db.tables())?)
    }

    /// Write the account back to the store.
    pub fn persist_account(&self) -> Result<(), CryptoError> {
        save_account(&self.db, &self.account)
    }

    fn inbound_session(
        &self,
        room_id: &RoomId,
        session_id: &str,
    ) -> Result<Option<InboundGroupSessionRecord>, CryptoError> {
        let cache_key = (room_id.clone(), session_id.to_string());
        if let Some(session) = guard(&self.inbound).get(&cache_key) {
            return Ok(Some(session.clone()));
        }
        let stored = self.with_tables(|t| t.inbound_group_session(room_id, session_id))?;
        if let Some(session) = &stored {
            guard(&self.inbound).insert(cache_key, session.clone());
        }
        Ok(stored)
    }

    fn store_inbound_session(&self, record: InboundGroupSessionRecord) -> Result<bool, CryptoError> {
        let inserted = self.with_tables(|t| t.insert_inbound_group_session(&record))?;
        if inserted {
            guard(&self.inbound)
                .insert((record.room_id.clone(), record.session_id.clone()), record);
        }
        Ok(inserted)
    }

    /// The room's outbound session, creating it (and our own inbound copy)
    /// when missing.
    fn outbound_session(&self, room_id: &RoomId) -> Result<(String, SymmetricKey), CryptoError> {
        if let Some(s) = guard(&self.outbound).get(room_id) {
            return Ok((s.session_id.clone(), s.key));
        }

        let session = OutboundGroupSession {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            key: cipher::generate_symmetric_key(),
        };
        let (sender_key, signing_key) = {
            let account = lock_account(&self.account);
            (account.curve25519_key(), account.ed25519_key())
        };
        self.store_inbound_session(InboundGroupSessionRecord {
            room_id: room_id.clone(),
            session_id: session.session_id.clone(),
            sender_key,
            signing_key: Some(signing_key),
            session_key: encode_b64(session.key),
            forwarding_chain: Vec::new(),
        })?;
        debug!(room_id = %room_id, session_id = %session.session_id, "created outbound group session");

        let mut outbound = guard(&self.outbound);
        let entry = outbound.entry(room_id.clone()).or_insert(session);
        Ok((entry.session_id.clone(), entry.key))
    }

    /// Reject a ciphertext seen earlier in the same pass under another
    /// event id.
    fn check_replay(
        &self,
        context_id: &str,
        ciphertext: &str,
        event_id: &EventId,
    ) -> Result<(), DecryptionError> {
        let mut replay = guard(&self.replay);
        if replay.context_id != context_id {
            replay.context_id = context_id.to_string();
            replay.seen.clear();
        }
        let digest = *blake3::hash(ciphertext.as_bytes()).as_bytes();
        match replay.seen.get(&digest) {
            Some(first) if first != event_id => Err(bad_message(format!(
                "ciphertext of {first} replayed in {event_id}"
            ))),
            _ => {
                replay.seen.insert(digest, event_id.clone());
                Ok(())
            }
        }
    }

    fn import_room_key(
        &self,
        event: &ToDeviceEvent,
        result: &DecryptionResult,
    ) -> Result<Option<ImportedRoomKey>, CryptoError> {
        let content = event.clear_content();
        let field = |name: &str| content.get(name).and_then(Value::as_str);

        if field("algorithm") != Some(LOCAL_GROUP_ALGORITHM) {
            debug!(algorithm = ?field("algorithm"), "ignoring room key with unknown algorithm");
            return Ok(None);
        }
        let (Some(room_id), Some(session_id), Some(session_key)) =
            (field("room_id"), field("session_id"), field("session_key"))
        else {
            warn!(sender = %event.sender, "malformed room key event");
            return Ok(None);
        };
        let room_id = RoomId::parse(room_id)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        decode_key(session_key)?;

        let record = if event.clear_type() == EVENT_FORWARDED_ROOM_KEY {
            let mut chain: Vec<String> = content
                .get("forwarding_curve25519_key_chain")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            chain.push(result.sender_curve25519_key.clone());
            InboundGroupSessionRecord {
                room_id: room_id.clone(),
                session_id: session_id.to_string(),
                sender_key: field("sender_key")
                    .unwrap_or(&result.sender_curve25519_key)
                    .to_string(),
                signing_key: field("sender_claimed_ed25519_key").map(str::to_string),
                session_key: session_key.to_string(),
                forwarding_chain: chain,
            }
        } else {
            InboundGroupSessionRecord {
                room_id: room_id.clone(),
                session_id: session_id.to_string(),
                sender_key: result.sender_curve25519_key.clone(),
                signing_key: result.claimed_ed25519_key.clone(),
                session_key: session_key.to_string(),
                forwarding_chain: Vec::new(),
            }
        };

        if self.store_inbound_session(record)? {
            info!(room_id = %room_id, session_id, "imported room key");
            Ok(Some(ImportedRoomKey {
                room_id,
                session_id: session_id.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl CryptoService for LocalCryptoService {
    async fn decrypt(
        &self,
        event: &Event,
        context_id: &str,
    ) -> Result<DecryptionResult, DecryptionError> {
        let content = EncryptedContent::from_content(&event.content).map_err(other)?;
        if content.algorithm != LOCAL_GROUP_ALGORITHM {
            return Err(DecryptionError::new(
                DecryptionErrorKind::UnsupportedAlgorithm,
                content.algorithm,
            ));
        }
        let session_id = content
            .session_id
            .ok_or_else(|| bad_message("missing session_id"))?;
        let ciphertext = content
            .ciphertext
            .as_str()
            .ok_or_else(|| bad_message("ciphertext is not a string"))?;

        let session = self
            .inbound_session(&event.room_id, &session_id)
            .map_err(other)?
            .ok_or_else(|| {
                DecryptionError::new(
                    DecryptionErrorKind::UnknownInboundSession,
                    format!("unknown session {session_id}"),
                )
                .with_session(session_id.clone())
            })?;
        self.check_replay(context_id, ciphertext, &event.event_id)?;

        let key = decode_key(&session.session_key).map_err(other)?;
        let bytes = decode_b64(ciphertext).map_err(|e| bad_message(e.to_string()))?;
        let plaintext = cipher::decrypt(&key, &bytes)
            .map_err(|e| bad_message(e.to_string()).with_session(session_id.clone()))?;
        let payload: Value =
            serde_json::from_slice(&plaintext).map_err(|e| bad_message(e.to_string()))?;

        if payload.get("room_id").and_then(Value::as_str) != Some(event.room_id.as_str()) {
            return Err(bad_message("plaintext is bound to another room"));
        }

        Ok(DecryptionResult {
            clear_event: json!({
                "type": payload.get("type").cloned().unwrap_or(Value::Null),
                "content": payload.get("content").cloned().unwrap_or_else(|| json!({})),
            }),
            sender_curve25519_key: session.sender_key,
            claimed_ed25519_key: session.signing_key,
            forwarding_curve25519_key_chain: session.forwarding_chain,
        })
    }

    async fn decrypt_to_device(
        &self,
        event: &ToDeviceEvent,
        _context_id: &str,
    ) -> Result<DecryptionResult, DecryptionError> {
        let content = EncryptedContent::from_content(&event.content).map_err(other)?;
        if content.algorithm != LOCAL_OLM_ALGORITHM {
            return Err(DecryptionError::new(
                DecryptionErrorKind::UnsupportedAlgorithm,
                content.algorithm,
            ));
        }
        let sender_key = content
            .sender_key
            .ok_or_else(|| bad_message("missing sender_key"))?;

        let (our_curve, our_ed, our_user) = {
            let account = lock_account(&self.account);
            (
                account.curve25519_key(),
                account.ed25519_key(),
                account.user_id().clone(),
            )
        };
        let message = content
            .ciphertext
            .get(&our_curve)
            .ok_or_else(|| bad_message("not encrypted for this device"))?;
        let body = message
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_message("missing body"))?;
        let bytes = decode_b64(body).map_err(|e| bad_message(e.to_string()))?;
        let one_time_key = message.get("one_time_key").and_then(Value::as_str);

        let plaintext = {
            let mut account = lock_account(&self.account);
            let existing = account
                .session_key(&sender_key)
                .and_then(|key| cipher::decrypt(&key, &bytes).ok());
            match (existing, one_time_key) {
                (Some(plaintext), _) => {
                    account.confirm_session(&sender_key);
                    plaintext
                }
                (None, Some(otk)) => {
                    let key = account
                        .create_inbound_session(&sender_key, otk)
                        .map_err(|e| bad_message(e.to_string()))?;
                    cipher::decrypt(&key, &bytes).map_err(|e| bad_message(e.to_string()))?
                }
                (None, None) => return Err(bad_message(format!("no session with {sender_key}"))),
            }
        };
        self.persist_account().map_err(other)?;

        let payload: Value =
            serde_json::from_slice(&plaintext).map_err(|e| bad_message(e.to_string()))?;
        let str_at = |path: &[&str]| {
            path.iter()
                .try_fold(&payload, |v, k| v.get(*k))
                .and_then(Value::as_str)
        };
        if str_at(&["sender"]) != Some(event.sender.as_str()) {
            return Err(bad_message("sender mismatch"));
        }
        if str_at(&["recipient"]) != Some(our_user.as_str())
            || str_at(&["recipient_keys", "ed25519"]) != Some(our_ed.as_str())
        {
            return Err(bad_message("recipient mismatch"));
        }

        Ok(DecryptionResult {
            clear_event: json!({
                "type": payload.get("type").cloned().unwrap_or(Value::Null),
                "content": payload.get("content").cloned().unwrap_or_else(|| json!({})),
            }),
            sender_curve25519_key: sender_key,
            claimed_ed25519_key: str_at(&["keys", "ed25519"]).map(str::to_string),
            forwarding_curve25519_key_chain: Vec::new(),
        })
    }

    fn is_room_encrypted(&self, room_id: &RoomId) -> bool {
        guard(&self.encrypted_rooms).contains(room_id)
    }

    fn on_state_event(&self, room_id: &RoomId, event: &Event) {
        if event.event_type == EVENT_ROOM_ENCRYPTION && event.state_key.as_deref() == Some("") {
            if guard(&self.encrypted_rooms).insert(room_id.clone()) {
                debug!(room_id = %room_id, "room is now encrypted");
            }
        }
    }

    fn on_live_event(&self, room_id: &RoomId, event: &Event) {
        self.on_state_event(room_id, event);
    }

    async fn on_to_device_event(&self, event: &ToDeviceEvent) -> Option<ImportedRoomKey> {
        // Room keys are only trusted when they arrived over a pairwise channel.
        let result = event.decryption.as_ref()?;
        let clear_type = event.clear_type();
        if clear_type != EVENT_ROOM_KEY && clear_type != EVENT_FORWARDED_ROOM_KEY {
            return None;
        }
        match self.import_room_key(event, result) {
            Ok(imported) => imported,
            Err(e) => {
                warn!(sender = %event.sender, error = %e, "failed to import room key");
                None
            }
        }
    }

    fn has_session_with(&self, curve25519_key: &str) -> bool {
        lock_account(&self.account).has_session_with(curve25519_key)
    }

    async fn create_session(
        &self,
        device: &DeviceKeys,
        one_time_key: &str,
    ) -> Result<(), CryptoError> {
        let identity = device
            .curve25519_key()
            .ok_or_else(|| CryptoError::MissingDeviceKey(device.device_id.to_string(), "curve25519"))?;
        lock_account(&self.account).create_outbound_session(identity, one_time_key)?;
        self.persist_account()?;
        debug!(user_id = %device.user_id, device_id = %device.device_id, "created pairwise session");
        Ok(())
    }

    async fn encrypt_to_device(
        &self,
        device: &DeviceKeys,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError> {
        let identity = device
            .curve25519_key()
            .ok_or_else(|| CryptoError::MissingDeviceKey(device.device_id.to_string(), "curve25519"))?;
        let their_ed = device
            .ed25519_key()
            .ok_or_else(|| CryptoError::MissingDeviceKey(device.device_id.to_string(), "ed25519"))?;

        let account = lock_account(&self.account);
        let key = account
            .session_key(identity)
            .ok_or_else(|| CryptoError::MissingSession(identity.to_string()))?;

        let payload = json!({
            "type": event_type,
            "content": content,
            "sender": account.user_id(),
            "sender_device": account.device_id(),
            "keys": { "ed25519": account.ed25519_key() },
            "recipient": device.user_id,
            "recipient_keys": { "ed25519": their_ed },
        });
        let body = encode_b64(cipher::encrypt(&key, &serde_json::to_vec(&payload)?)?);

        let mut message = json!({ "type": MESSAGE_TYPE_NORMAL, "body": body });
        if let Some(otk) = account.pending_prekey(identity) {
            message["type"] = json!(MESSAGE_TYPE_PREKEY);
            message["one_time_key"] = json!(otk);
        }

        Ok(json!({
            "algorithm": LOCAL_OLM_ALGORITHM,
            "sender_key": account.curve25519_key(),
            "ciphertext": { identity: message },
        }))
    }

    async fn room_key_content(&self, room_id: &RoomId) -> Result<Value, CryptoError> {
        let (session_id, key) = self.outbound_session(room_id)?;
        Ok(json!({
            "algorithm": LOCAL_GROUP_ALGORITHM,
            "room_id": room_id,
            "session_id": session_id,
            "session_key": encode_b64(key),
        }))
    }

    async fn encrypt_room_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError> {
        let (session_id, key) = self.outbound_session(room_id)?;
        let payload = json!({ "type": event_type, "content": content, "room_id": room_id });
        let ciphertext = encode_b64(cipher::encrypt(&key, &serde_json::to_vec(&payload)?)?);

        let account = lock_account(&self.account);
        Ok(json!({
            "algorithm": LOCAL_GROUP_ALGORITHM,
            "sender_key": account.curve25519_key(),
            "session_id": session_id,
            "device_id": account.device_id(),
            "ciphertext": ciphertext,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::Database;

    fn service(user: &str, device: &str) -> LocalCryptoService {
        let db = Database::open_in_memory().unwrap().into_shared();
        let account = LocalCryptoService::load_account(
            &db,
            &UserId::parse(user).unwrap(),
            &DeviceId::parse(device).unwrap(),
        )
        .unwrap();
        LocalCryptoService::new(db, account).unwrap()
    }

    fn room() -> RoomId {
        RoomId::parse("!room:example.org").unwrap()
    }

    fn encrypted_event(id: &str, room: &RoomId, sender: &str, content: Value) -> Event {
        Event::from_raw(
            &json!({
                "event_id": id,
                "type": "m.room.encrypted",
                "sender": sender,
                "origin_server_ts": 1,
                "content": content,
            }),
            room,
        )
        .unwrap()
    }

    fn to_device(sender: &str, event_type: &str, content: Value) -> ToDeviceEvent {
        ToDeviceEvent::from_raw(&json!({ "type": event_type, "sender": sender, "content": content }))
            .unwrap()
    }

    /// Alice claims one of Bob's one-time keys and opens a channel.
    async fn connect(alice: &LocalCryptoService, bob: &LocalCryptoService) -> DeviceKeys {
        let (bob_keys, otk) = {
            let mut acct = lock_account(bob.account());
            acct.generate_one_time_keys(1);
            let keys = acct.unpublished_one_time_keys().unwrap();
            acct.mark_keys_as_published();
            (acct.device_keys().unwrap(), keys.into_values().next().unwrap())
        };
        alice.create_session(&bob_keys, otk.key()).await.unwrap();
        bob_keys
    }

    #[tokio::test]
    async fn test_own_room_messages_decrypt() {
        let alice = service("@alice:example.org", "ALICE");
        let content = alice
            .encrypt_room_event(&room(), "m.room.message", &json!({ "body": "hi" }))
            .await
            .unwrap();

        let event = encrypted_event("$1", &room(), "@alice:example.org", content);
        let result = alice.decrypt(&event, "ctx").await.unwrap();
        assert_eq!(result.clear_type(), Some("m.room.message"));
        assert_eq!(result.clear_content().unwrap()["body"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_session_reports_session_id() {
        let alice = service("@alice:example.org", "ALICE");
        let bob = service("@bob:example.org", "BOB");
        let content = alice
            .encrypt_room_event(&room(), "m.room.message", &json!({ "body": "hi" }))
            .await
            .unwrap();
        let session_id = content["session_id"].as_str().unwrap().to_string();

        let event = encrypted_event("$1", &room(), "@alice:example.org", content);
        let err = bob.decrypt(&event, "ctx").await.unwrap_err();
        assert_eq!(err.kind, DecryptionErrorKind::UnknownInboundSession);
        assert_eq!(err.session_id.as_deref(), Some(session_id.as_str()));
    }

    #[tokio::test]
    async fn test_session_is_scoped_to_room() {
        let alice = service("@alice:example.org", "ALICE");
        let content = alice
            .encrypt_room_event(&room(), "m.room.message", &json!({ "body": "hi" }))
            .await
            .unwrap();

        let other_room = RoomId::parse("!other:example.org").unwrap();
        let event = encrypted_event("$1", &other_room, "@alice:example.org", content);
        let err = alice.decrypt(&event, "ctx").await.unwrap_err();
        assert_eq!(err.kind, DecryptionErrorKind::UnknownInboundSession);
    }

    #[tokio::test]
    async fn test_replay_within_context_is_rejected() {
        let alice = service("@alice:example.org", "ALICE");
        let content = alice
            .encrypt_room_event(&room(), "m.room.message", &json!({ "body": "hi" }))
            .await
            .unwrap();

        let first = encrypted_event("$1", &room(), "@alice:example.org", content.clone());
        let second = encrypted_event("$2", &room(), "@alice:example.org", content);
        alice.decrypt(&first, "ctx").await.unwrap();
        alice.decrypt(&first, "ctx").await.unwrap();
        let err = alice.decrypt(&second, "ctx").await.unwrap_err();
        assert_eq!(err.kind, DecryptionErrorKind::BadEncryptedMessage);

        // a new pass starts clean
        alice.decrypt(&second, "ctx2").await.unwrap();
    }

    #[tokio::test]
    async fn test_room_key_over_pairwise_channel() {
        let alice = service("@alice:example.org", "ALICE");
        let bob = service("@bob:example.org", "BOB");
        let bob_keys = connect(&alice, &bob).await;

        let key_content = alice.room_key_content(&room()).await.unwrap();
        let encrypted = alice
            .encrypt_to_device(&bob_keys, EVENT_ROOM_KEY, &key_content)
            .await
            .unwrap();

        let mut event = to_device("@alice:example.org", "m.room.encrypted", encrypted);
        let result = bob.decrypt_to_device(&event, "ctx").await.unwrap();
        assert_eq!(
            result.claimed_ed25519_key.as_deref(),
            Some(lock_account(alice.account()).ed25519_key().as_str())
        );
        event.decryption = Some(result);

        let imported = bob.on_to_device_event(&event).await.unwrap();
        assert_eq!(imported.room_id, room());

        // importing the same key twice reports nothing new
        assert!(bob.on_to_device_event(&event).await.is_none());

        let content = alice
            .encrypt_room_event(&room(), "m.room.message", &json!({ "body": "secret" }))
            .await
            .unwrap();
        let room_event = encrypted_event("$9", &room(), "@alice:example.org", content);
        let clear = bob.decrypt(&room_event, "ctx").await.unwrap();
        assert_eq!(clear.clear_content().unwrap()["body"], "secret");
    }

    #[tokio::test]
    async fn test_unencrypted_room_key_is_ignored() {
        let bob = service("@bob:example.org", "BOB");
        let event = to_device(
            "@mallory:example.org",
            EVENT_ROOM_KEY,
            json!({
                "algorithm": LOCAL_GROUP_ALGORITHM,
                "room_id": "!room:example.org",
                "session_id": "s",
                "session_key": encode_b64([0u8; 32]),
            }),
        );
        assert!(bob.on_to_device_event(&event).await.is_none());
    }

    #[tokio::test]
    async fn test_message_for_other_device_is_bad() {
        let alice = service("@alice:example.org", "ALICE");
        let bob = service("@bob:example.org", "BOB");
        let carol = service("@carol:example.org", "CAROL");
        let bob_keys = connect(&alice, &bob).await;

        let encrypted = alice
            .encrypt_to_device(&bob_keys, "m.dummy", &json!({}))
            .await
            .unwrap();
        let event = to_device("@alice:example.org", "m.room.encrypted", encrypted);
        let err = carol.decrypt_to_device(&event, "ctx").await.unwrap_err();
        assert_eq!(err.kind, DecryptionErrorKind::BadEncryptedMessage);
    }

    #[tokio::test]
    async fn test_encryption_state_marks_room() {
        let alice = service("@alice:example.org", "ALICE");
        assert!(!alice.is_room_encrypted(&room()));

        let event = Event::from_raw(
            &json!({
                "event_id": "$e",
                "type": EVENT_ROOM_ENCRYPTION,
                "state_key": "",
                "sender": "@alice:example.org",
                "origin_server_ts": 1,
                "content": { "algorithm": LOCAL_GROUP_ALGORITHM },
            }),
            &room(),
        )
        .unwrap();
        alice.on_state_event(&room(), &event);
        assert!(alice.is_room_encrypted(&room()));
    }
}

//! Crypto side of sync: to-device decryption, room event decryption and
//! retroactive decryption once a missing room key shows up.
//!
//! Nothing here holds the store lock across a decrypt call.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_crypto::{CryptoService, ImportedRoomKey};
use strata_shared::constants::EVENT_ROOM_MESSAGE;
use strata_shared::{DecryptionResult, Event, RoomId, ToDeviceEvent};
use strata_store::SharedDatabase;

use crate::error::Result;
use crate::verification::VerificationTracker;

/// To-device events of one payload after decryption.
#[derive(Debug, Default)]
pub struct ToDeviceOutcome {
    /// Events that are usable: plaintext ones and those that decrypted.
    pub events: Vec<ToDeviceEvent>,
    pub imported_keys: Vec<ImportedRoomKey>,
    pub undecryptable: usize,
}

#[derive(Clone)]
pub struct CryptoSyncHandler {
    crypto: Arc<dyn CryptoService>,
    db: SharedDatabase,
    verification: Arc<VerificationTracker>,
}

impl CryptoSyncHandler {
    pub fn new(
        crypto: Arc<dyn CryptoService>,
        db: SharedDatabase,
        verification: Arc<VerificationTracker>,
    ) -> Self {
        Self {
            crypto,
            db,
            verification,
        }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoService> {
        &self.crypto
    }

    pub fn verification(&self) -> &VerificationTracker {
        &self.verification
    }

    /// Decrypt and dispatch the `to_device` section. The server does not
    /// redeliver these, so a failed decryption is logged and dropped.
    pub async fn handle_to_device(&self, raw: &[Value]) -> ToDeviceOutcome {
        let mut outcome = ToDeviceOutcome::default();

        for value in raw {
            let mut event = match ToDeviceEvent::from_raw(value) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping malformed to-device event");
                    continue;
                }
            };

            if event.is_encrypted() {
                let context_id = Uuid::new_v4().to_string();
                match self.crypto.decrypt_to_device(&event, &context_id).await {
                    Ok(result) => event.decryption = Some(result),
                    Err(e) => {
                        debug!(sender = %event.sender, error = %e, "failed to decrypt to-device event");
                        outcome.undecryptable += 1;
                        continue;
                    }
                }
            }

            self.verification.observe(&event);
            if let Some(key) = self.crypto.on_to_device_event(&event).await {
                debug!(room_id = %key.room_id, session_id = %key.session_id, "room key imported");
                outcome.imported_keys.push(key);
            }
            outcome.events.push(event);
        }
        outcome
    }

    /// Resolve every encrypted event of a batch. Results already stored for
    /// an event are reused; failures are attached to the event, which stays
    /// in the batch.
    pub async fn decrypt_events(&self, room_id: &RoomId, events: &mut [Event], context_id: &str) -> Result<()> {
        if !events.iter().any(Event::is_encrypted) {
            return Ok(());
        }

        {
            let db = strata_store::lock(&self.db);
            let tables = db.tables();
            for event in events.iter_mut().filter(|e| e.is_encrypted() && e.decryption.is_none()) {
                if let Some(stored) = tables.get_event(&event.event_id)? {
                    event.decryption = stored.decryption;
                }
            }
        }

        for event in events.iter_mut() {
            self.decrypt_event(room_id, event, context_id).await;
        }
        Ok(())
    }

    /// Decrypt one room event in place unless it is plaintext or already
    /// decrypted.
    pub async fn decrypt_event(&self, room_id: &RoomId, event: &mut Event, context_id: &str) {
        if !event.is_encrypted() || event.decryption.is_some() {
            return;
        }
        if event.is_redacted() {
            event.decryption = Some(redacted_result(event));
            event.decryption_error = None;
            return;
        }

        match self.crypto.decrypt(event, context_id).await {
            Ok(result) => {
                event.decryption = Some(result);
                event.decryption_error = None;
            }
            Err(e) => {
                warn!(
                    room_id = %room_id,
                    event_id = %event.event_id,
                    kind = ?e.kind,
                    "unable to decrypt event"
                );
                event.decryption_error = Some(e);
            }
        }
    }

    /// Re-decrypt stored events that were waiting for one of `keys`.
    /// Returns the events that now decrypt, grouped by room.
    pub async fn retry_decryption(&self, keys: &[ImportedRoomKey]) -> Result<Vec<(RoomId, Vec<Event>)>> {
        let mut recovered = Vec::new();

        for key in keys {
            let waiting = {
                let db = strata_store::lock(&self.db);
                let tables = db.tables();
                tables.events_awaiting_session(&key.room_id, &key.session_id)?
            };
            if waiting.is_empty() {
                continue;
            }

            let context_id = Uuid::new_v4().to_string();
            let mut decrypted = Vec::new();
            for mut event in waiting {
                match self.crypto.decrypt(&event, &context_id).await {
                    Ok(result) => {
                        event.decryption = Some(result);
                        event.decryption_error = None;
                        decrypted.push(event);
                    }
                    Err(e) => debug!(event_id = %event.event_id, error = %e, "still unable to decrypt"),
                }
            }

            {
                let db = strata_store::lock(&self.db);
                let tables = db.tables();
                for event in &decrypted {
                    if let Some(result) = &event.decryption {
                        tables.record_decryption(&event.event_id, result)?;
                    }
                }
            }

            if !decrypted.is_empty() {
                info!(
                    room_id = %key.room_id,
                    session_id = %key.session_id,
                    count = decrypted.len(),
                    "retroactively decrypted events"
                );
                recovered.push((key.room_id.clone(), decrypted));
            }
        }
        Ok(recovered)
    }
}

/// Redacted encrypted events carry no ciphertext; they read as an empty
/// message.
fn redacted_result(event: &Event) -> DecryptionResult {
    DecryptionResult {
        clear_event: json!({ "type": EVENT_ROOM_MESSAGE, "content": {} }),
        sender_curve25519_key: event
            .content
            .get("sender_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        claimed_ed25519_key: None,
        forwarding_curve25519_key_chain: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encrypted_event, FakeCrypto};
    use strata_shared::{DecryptionErrorKind, UserId, DeviceId};
    use strata_store::Database;

    fn handler(crypto: Arc<FakeCrypto>) -> (CryptoSyncHandler, SharedDatabase) {
        let db = Database::open_in_memory().unwrap().into_shared();
        let tracker = Arc::new(VerificationTracker::new(
            UserId::parse("@me:example.org").unwrap(),
            DeviceId::parse("PHONE").unwrap(),
        ));
        (CryptoSyncHandler::new(crypto, db.clone(), tracker), db)
    }

    fn room() -> RoomId {
        RoomId::parse("!r:example.org").unwrap()
    }

    #[tokio::test]
    async fn test_failed_decryption_keeps_event() {
        let crypto = Arc::new(FakeCrypto::default());
        let (handler, _) = handler(crypto);
        let mut events = vec![encrypted_event("$e", "s1", "secret", false)];

        handler.decrypt_events(&room(), &mut events, "ctx").await.unwrap();
        assert_eq!(events.len(), 1);
        let error = events[0].decryption_error.as_ref().unwrap();
        assert_eq!(error.kind, DecryptionErrorKind::UnknownInboundSession);
        assert_eq!(error.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_redacted_event_is_not_decrypted() {
        let crypto = Arc::new(FakeCrypto::default());
        let (handler, _) = handler(crypto.clone());
        let mut event = encrypted_event("$e", "s1", "secret", true);

        handler.decrypt_event(&room(), &mut event, "ctx").await;
        assert_eq!(event.clear_type(), "m.room.message");
        assert_eq!(event.clear_content(), &json!({}));
        assert_eq!(crypto.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_stored_result_is_reused() {
        let crypto = Arc::new(FakeCrypto::default());
        crypto.add_session("s1");
        let (handler, db) = handler(crypto.clone());

        let mut first = vec![encrypted_event("$e", "s1", "secret", false)];
        handler.decrypt_events(&room(), &mut first, "ctx").await.unwrap();
        strata_store::lock(&db).tables().upsert_event(&first[0]).unwrap();

        crypto.remove_session("s1");
        let mut again = vec![encrypted_event("$e", "s1", "secret", false)];
        handler.decrypt_events(&room(), &mut again, "ctx2").await.unwrap();
        assert_eq!(again[0].clear_content()["body"], "secret");
        assert_eq!(crypto.decrypt_calls(), 1);
    }

    #[tokio::test]
    async fn test_to_device_failures_are_dropped() {
        let crypto = Arc::new(FakeCrypto::default());
        let (handler, _) = handler(crypto);
        let raw = vec![
            serde_json::json!({
                "type": "m.room.encrypted",
                "sender": "@bob:example.org",
                "content": { "algorithm": "fake", "ciphertext": "garbage" }
            }),
            serde_json::json!({ "type": "m.dummy", "sender": "@bob:example.org", "content": {} }),
            serde_json::json!({ "sender": "@bob:example.org" }),
        ];

        let outcome = handler.handle_to_device(&raw).await;
        assert_eq!(outcome.undecryptable, 1);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, "m.dummy");
    }

    #[tokio::test]
    async fn test_room_key_triggers_retroactive_decryption() {
        let crypto = Arc::new(FakeCrypto::default());
        let (handler, db) = handler(crypto.clone());

        let mut events = vec![encrypted_event("$late", "s9", "finally", false)];
        handler.decrypt_events(&room(), &mut events, "ctx").await.unwrap();
        strata_store::lock(&db).tables().upsert_event(&events[0]).unwrap();

        let outcome = handler
            .handle_to_device(&[crate::test_support::room_key_to_device(&room(), "s9")])
            .await;
        assert_eq!(outcome.imported_keys.len(), 1);

        let recovered = handler.retry_decryption(&outcome.imported_keys).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].1[0].clear_content()["body"], "finally");

        let stored = strata_store::lock(&db)
            .tables()
            .get_event(&events[0].event_id)
            .unwrap()
            .unwrap();
        assert!(stored.decryption.is_some());
        assert!(stored.decryption_error.is_none());
    }
}

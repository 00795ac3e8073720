//! The normalised event envelope.
//!
//! Every event reaching storage goes through [`Event::from_raw`] first. A
//! malformed event fails alone with an [`EventError`]; callers skip it and
//! keep processing the rest of the batch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::EVENT_ROOM_ENCRYPTED;
use crate::error::EventError;
use crate::types::{EventId, RoomId, UserId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsignedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_because: Option<Value>,
}

/// Outcome of a successful decryption. `clear_event` carries the plaintext
/// `type` and `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptionResult {
    pub clear_event: Value,
    pub sender_curve25519_key: String,
    #[serde(default)]
    pub claimed_ed25519_key: Option<String>,
    #[serde(default)]
    pub forwarding_curve25519_key_chain: Vec<String>,
}

impl DecryptionResult {
    pub fn clear_type(&self) -> Option<&str> {
        self.clear_event.get("type").and_then(Value::as_str)
    }

    pub fn clear_content(&self) -> Option<&Value> {
        self.clear_event.get("content")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecryptionErrorKind {
    /// The group session is not known yet. Retried when the key arrives.
    UnknownInboundSession,
    /// The pairwise channel is broken. The sending device is treated as wedged.
    BadEncryptedMessage,
    UnsupportedAlgorithm,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct DecryptionError {
    pub kind: DecryptionErrorKind,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl DecryptionError {
    pub fn new(kind: DecryptionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Encrypted payload of an `m.room.encrypted` event, room or to-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedContent {
    pub algorithm: String,
    #[serde(default)]
    pub sender_key: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// A string for group messages, a map keyed by recipient key for olm.
    pub ciphertext: Value,
}

impl EncryptedContent {
    pub fn from_content(content: &Value) -> Result<Self, EventError> {
        serde_json::from_value(content.clone()).map_err(|e| EventError::InvalidField {
            field: "content",
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub event_type: String,
    pub sender: UserId,
    pub origin_server_ts: i64,
    pub state_key: Option<String>,
    pub content: Value,
    pub unsigned: UnsignedData,
    pub redacts: Option<EventId>,
    pub decryption: Option<DecryptionResult>,
    pub decryption_error: Option<DecryptionError>,
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, EventError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(EventError::InvalidField {
            field,
            reason: "expected a string".into(),
        }),
        None => Err(EventError::MissingField(field)),
    }
}

fn object_content(obj: &Map<String, Value>) -> Result<Value, EventError> {
    match obj.get("content") {
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        Some(_) => Err(EventError::InvalidField {
            field: "content",
            reason: "expected an object".into(),
        }),
        None => Ok(Value::Object(Map::new())),
    }
}

impl Event {
    /// Normalise a raw timeline or state event received for `room_id`.
    pub fn from_raw(raw: &Value, room_id: &RoomId) -> Result<Self, EventError> {
        let obj = raw.as_object().ok_or(EventError::NotAnObject)?;

        let event_id = EventId::parse(required_str(obj, "event_id")?)?;
        let event_type = required_str(obj, "type")?.to_string();
        let sender = UserId::parse(required_str(obj, "sender")?)?;
        let origin_server_ts = obj
            .get("origin_server_ts")
            .and_then(Value::as_i64)
            .ok_or(EventError::MissingField("origin_server_ts"))?;
        let state_key = match obj.get("state_key") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(EventError::InvalidField {
                    field: "state_key",
                    reason: "expected a string".into(),
                })
            }
        };
        let unsigned = match obj.get("unsigned") {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
            None => UnsignedData::default(),
        };
        let redacts = obj
            .get("redacts")
            .and_then(Value::as_str)
            .map(EventId::parse)
            .transpose()?;

        Ok(Self {
            event_id,
            room_id: room_id.clone(),
            event_type,
            sender,
            origin_server_ts,
            state_key,
            content: object_content(obj)?,
            unsigned,
            redacts,
            decryption: None,
            decryption_error: None,
        })
    }

    /// Normalise a stripped state event from an invite preview. These carry
    /// neither an id nor a timestamp, so a stable id is derived from the
    /// state slot they occupy.
    pub fn from_stripped_state(raw: &Value, room_id: &RoomId) -> Result<Self, EventError> {
        let obj = raw.as_object().ok_or(EventError::NotAnObject)?;
        let event_type = required_str(obj, "type")?.to_string();
        let state_key = required_str(obj, "state_key")?.to_string();
        let sender = UserId::parse(required_str(obj, "sender")?)?;
        let event_id = EventId::parse(format!(
            "$stripped.{}.{}.{}",
            room_id, event_type, state_key
        ))?;

        Ok(Self {
            event_id,
            room_id: room_id.clone(),
            event_type,
            sender,
            origin_server_ts: obj.get("origin_server_ts").and_then(Value::as_i64).unwrap_or(0),
            state_key: Some(state_key),
            content: object_content(obj)?,
            unsigned: UnsignedData::default(),
            redacts: None,
            decryption: None,
            decryption_error: None,
        })
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.event_type == EVENT_ROOM_ENCRYPTED
    }

    pub fn is_redacted(&self) -> bool {
        self.unsigned.redacted_because.is_some()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.unsigned.transaction_id.as_deref()
    }

    /// Plaintext type, falling back to the envelope type.
    pub fn clear_type(&self) -> &str {
        self.decryption
            .as_ref()
            .and_then(DecryptionResult::clear_type)
            .unwrap_or(&self.event_type)
    }

    /// Plaintext content, falling back to the envelope content.
    pub fn clear_content(&self) -> &Value {
        self.decryption
            .as_ref()
            .and_then(DecryptionResult::clear_content)
            .unwrap_or(&self.content)
    }

    /// Wire form of the envelope, as the server would send it.
    pub fn to_raw(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("event_id".into(), self.event_id.as_str().into());
        obj.insert("room_id".into(), self.room_id.as_str().into());
        obj.insert("type".into(), self.event_type.clone().into());
        obj.insert("sender".into(), self.sender.as_str().into());
        obj.insert("origin_server_ts".into(), self.origin_server_ts.into());
        obj.insert("content".into(), self.content.clone());
        if let Some(state_key) = &self.state_key {
            obj.insert("state_key".into(), state_key.clone().into());
        }
        if let Some(redacts) = &self.redacts {
            obj.insert("redacts".into(), redacts.as_str().into());
        }
        if self.unsigned != UnsignedData::default() {
            obj.insert(
                "unsigned".into(),
                serde_json::to_value(&self.unsigned).unwrap_or(Value::Null),
            );
        }
        Value::Object(obj)
    }
}

/// A device-addressed event from the `to_device` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ToDeviceEvent {
    pub event_type: String,
    pub sender: UserId,
    pub content: Value,
    pub decryption: Option<DecryptionResult>,
}

impl ToDeviceEvent {
    pub fn from_raw(raw: &Value) -> Result<Self, EventError> {
        let obj = raw.as_object().ok_or(EventError::NotAnObject)?;
        Ok(Self {
            event_type: required_str(obj, "type")?.to_string(),
            sender: UserId::parse(required_str(obj, "sender")?)?,
            content: object_content(obj)?,
            decryption: None,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.event_type == EVENT_ROOM_ENCRYPTED
    }

    pub fn clear_type(&self) -> &str {
        self.decryption
            .as_ref()
            .and_then(DecryptionResult::clear_type)
            .unwrap_or(&self.event_type)
    }

    pub fn clear_content(&self) -> &Value {
        self.decryption
            .as_ref()
            .and_then(DecryptionResult::clear_content)
            .unwrap_or(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::parse("!room:example.org").unwrap()
    }

    #[test]
    fn test_from_raw_message() {
        let raw = json!({
            "event_id": "$e1",
            "type": "m.room.message",
            "sender": "@alice:example.org",
            "origin_server_ts": 1_700_000_000_000i64,
            "content": { "msgtype": "m.text", "body": "hi" },
            "unsigned": { "transaction_id": "txn1", "age": 12 }
        });
        let event = Event::from_raw(&raw, &room()).unwrap();
        assert_eq!(event.event_id.as_str(), "$e1");
        assert!(!event.is_state());
        assert_eq!(event.transaction_id(), Some("txn1"));
        assert_eq!(event.clear_type(), "m.room.message");
    }

    #[test]
    fn test_from_raw_rejects_missing_sender() {
        let raw = json!({
            "event_id": "$e1",
            "type": "m.room.message",
            "origin_server_ts": 1,
            "content": {}
        });
        assert!(matches!(
            Event::from_raw(&raw, &room()),
            Err(EventError::MissingField("sender"))
        ));
    }

    #[test]
    fn test_from_raw_rejects_non_object_content() {
        let raw = json!({
            "event_id": "$e1",
            "type": "m.room.message",
            "sender": "@alice:example.org",
            "origin_server_ts": 1,
            "content": "nope"
        });
        assert!(Event::from_raw(&raw, &room()).is_err());
    }

    #[test]
    fn test_stripped_state_gets_stable_id() {
        let raw = json!({
            "type": "m.room.name",
            "state_key": "",
            "sender": "@alice:example.org",
            "content": { "name": "Lobby" }
        });
        let a = Event::from_stripped_state(&raw, &room()).unwrap();
        let b = Event::from_stripped_state(&raw, &room()).unwrap();
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a.state_key.as_deref(), Some(""));
    }

    #[test]
    fn test_clear_type_prefers_decryption() {
        let raw = json!({
            "event_id": "$e2",
            "type": "m.room.encrypted",
            "sender": "@alice:example.org",
            "origin_server_ts": 1,
            "content": { "algorithm": "m.megolm.v1.aes-sha2", "ciphertext": "AAA" }
        });
        let mut event = Event::from_raw(&raw, &room()).unwrap();
        assert!(event.is_encrypted());
        event.decryption = Some(DecryptionResult {
            clear_event: json!({ "type": "m.room.message", "content": { "body": "secret" } }),
            sender_curve25519_key: "key".into(),
            claimed_ed25519_key: None,
            forwarding_curve25519_key_chain: vec![],
        });
        assert_eq!(event.clear_type(), "m.room.message");
        assert_eq!(event.clear_content()["body"], "secret");
    }

    #[test]
    fn test_encrypted_content_parse() {
        let content = json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "sender_key": "sk",
            "session_id": "sid",
            "ciphertext": "abc"
        });
        let parsed = EncryptedContent::from_content(&content).unwrap();
        assert_eq!(parsed.session_id.as_deref(), Some("sid"));
        assert!(EncryptedContent::from_content(&json!({ "algorithm": "x" })).is_err());
    }
}

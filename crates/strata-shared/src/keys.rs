//! Request and response models for the key-exchange endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{DeviceId, UserId};

/// `user_id -> key_id -> signature`
pub type Signatures = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub algorithms: Vec<String>,
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub signatures: Signatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

impl DeviceKeys {
    pub fn ed25519_key(&self) -> Option<&str> {
        self.keys
            .get(&format!("ed25519:{}", self.device_id))
            .map(String::as_str)
    }

    pub fn curve25519_key(&self) -> Option<&str> {
        self.keys
            .get(&format!("curve25519:{}", self.device_id))
            .map(String::as_str)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.unsigned
            .as_ref()
            .and_then(|u| u.get("device_display_name"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedKey {
    pub key: String,
    #[serde(default)]
    pub signatures: Signatures,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneTimeKey {
    Signed(SignedKey),
    Unsigned(String),
}

impl OneTimeKey {
    pub fn key(&self) -> &str {
        match self {
            OneTimeKey::Signed(k) => &k.key,
            OneTimeKey::Unsigned(k) => k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSigningKey {
    pub user_id: UserId,
    pub usage: Vec<String>,
    pub keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: Signatures,
}

impl CrossSigningKey {
    /// The single ed25519 public key, if present.
    pub fn public_key(&self) -> Option<(&str, &str)> {
        self.keys
            .iter()
            .find(|(id, _)| id.starts_with("ed25519:"))
            .map(|(id, k)| (id.as_str(), k.as_str()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_keys: Option<DeviceKeys>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_time_keys: BTreeMap<String, OneTimeKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysUploadResponse {
    #[serde(default)]
    pub one_time_key_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysClaimRequest {
    /// `user_id -> device_id -> algorithm`
    pub one_time_keys: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysClaimResponse {
    /// `user_id -> device_id -> key_id -> key`
    #[serde(default)]
    pub one_time_keys: BTreeMap<String, BTreeMap<String, BTreeMap<String, OneTimeKey>>>,
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysQueryRequest {
    /// `user_id -> device ids`, empty list meaning all devices.
    pub device_keys: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    /// Device keys stay raw so that each device is validated on its own.
    #[serde(default)]
    pub device_keys: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
    #[serde(default)]
    pub master_keys: BTreeMap<String, Value>,
    #[serde(default)]
    pub self_signing_keys: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_signing_keys: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyChangesResponse {
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default)]
    pub left: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendToDeviceRequest {
    /// `user_id -> device_id (or "*") -> content`
    pub messages: BTreeMap<String, BTreeMap<String, Value>>,
}

impl SendToDeviceRequest {
    pub fn is_empty(&self) -> bool {
        self.messages.values().all(BTreeMap::is_empty)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningKeysUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<CrossSigningKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signing_key: Option<CrossSigningKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_signing_key: Option<CrossSigningKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthData>,
}

/// Interactive-auth credentials attached to a retried request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Interactive-auth challenge returned with a 401.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiaChallenge {
    #[serde(default)]
    pub flows: Vec<AuthFlow>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UiaChallenge {
    pub fn offers_stage(&self, stage: &str) -> bool {
        self.flows
            .iter()
            .any(|f| f.stages.first().map(String::as_str) == Some(stage))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthFlow {
    #[serde(default)]
    pub stages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_keys_accessors() {
        let keys: DeviceKeys = serde_json::from_value(json!({
            "user_id": "@alice:hs",
            "device_id": "DEV",
            "algorithms": ["m.olm.v1.curve25519-aes-sha2"],
            "keys": { "ed25519:DEV": "ed", "curve25519:DEV": "cu" },
            "unsigned": { "device_display_name": "Phone" }
        }))
        .unwrap();
        assert_eq!(keys.ed25519_key(), Some("ed"));
        assert_eq!(keys.curve25519_key(), Some("cu"));
        assert_eq!(keys.display_name(), Some("Phone"));
    }

    #[test]
    fn test_one_time_key_variants() {
        let signed: OneTimeKey =
            serde_json::from_value(json!({ "key": "abc", "signatures": {} })).unwrap();
        assert!(matches!(signed, OneTimeKey::Signed(_)));
        let unsigned: OneTimeKey = serde_json::from_value(json!("xyz")).unwrap();
        assert_eq!(unsigned.key(), "xyz");
    }

    #[test]
    fn test_uia_challenge_stage() {
        let challenge: UiaChallenge = serde_json::from_value(json!({
            "flows": [{ "stages": ["m.login.password"] }],
            "session": "s1"
        }))
        .unwrap();
        assert!(challenge.offers_stage("m.login.password"));
        assert!(!challenge.offers_stage("m.login.sso"));
    }
}

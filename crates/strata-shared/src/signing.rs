//! Canonical JSON and ed25519 object signing.
//!
//! Objects are signed over their canonical form with `signatures` and
//! `unsigned` removed. `serde_json::Value` keeps object keys in a sorted map,
//! so compact serialization already yields the canonical key order.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::{Map, Value};

use crate::error::SignatureError;

/// Unpadded standard base64, as used for every key and signature.
pub fn encode_b64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Accepts both padded and unpadded input.
pub fn decode_b64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(s.trim_end_matches('='))
}

pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

fn signable_bytes(value: &Value) -> Result<Vec<u8>, SignatureError> {
    let obj = value.as_object().ok_or(SignatureError::NotAnObject)?;
    let stripped: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "signatures" && k.as_str() != "unsigned")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(canonical_json(&Value::Object(stripped)).into_bytes())
}

/// Add a signature by `user_id`/`key_id` to `value`, keeping existing ones.
pub fn sign_json(
    key: &SigningKey,
    user_id: &str,
    key_id: &str,
    value: &mut Value,
) -> Result<(), SignatureError> {
    let signature = key.sign(&signable_bytes(value)?);
    let obj = value.as_object_mut().ok_or(SignatureError::NotAnObject)?;
    let signatures = obj
        .entry("signatures")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(signatures) = signatures else {
        return Err(SignatureError::NotAnObject);
    };
    let by_user = signatures
        .entry(user_id.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(by_user) = by_user else {
        return Err(SignatureError::NotAnObject);
    };
    by_user.insert(key_id.to_string(), encode_b64(signature.to_bytes()).into());
    Ok(())
}

/// Check the signature of `user_id`/`key_id` on `value` against a base64
/// ed25519 public key.
pub fn verify_json(
    value: &Value,
    user_id: &str,
    key_id: &str,
    public_key_b64: &str,
) -> Result<(), SignatureError> {
    let signature_b64 = value
        .get("signatures")
        .and_then(|s| s.get(user_id))
        .and_then(|s| s.get(key_id))
        .and_then(Value::as_str)
        .ok_or_else(|| SignatureError::MissingSignature {
            user_id: user_id.to_string(),
            key_id: key_id.to_string(),
        })?;

    let key_bytes: [u8; 32] = decode_b64(public_key_b64)?
        .try_into()
        .map_err(|_| SignatureError::InvalidKeyBytes)?;
    let sig_bytes: [u8; 64] = decode_b64(signature_b64)?
        .try_into()
        .map_err(|_| SignatureError::InvalidKeyBytes)?;

    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::InvalidKeyBytes)?;
    verifying_key
        .verify(&signable_bytes(value)?, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| SignatureError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde_json::json;

    #[test]
    fn test_canonical_key_order() {
        let v = json!({ "b": 1, "a": { "d": 2, "c": 3 } });
        assert_eq!(canonical_json(&v), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_sign_then_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let public = encode_b64(key.verifying_key().to_bytes());
        let mut obj = json!({ "user_id": "@a:hs", "unsigned": { "age": 3 } });

        sign_json(&key, "@a:hs", "ed25519:DEV", &mut obj).unwrap();
        assert!(verify_json(&obj, "@a:hs", "ed25519:DEV", &public).is_ok());

        // unsigned is outside the signed payload
        obj["unsigned"] = json!({ "age": 99 });
        assert!(verify_json(&obj, "@a:hs", "ed25519:DEV", &public).is_ok());

        obj["user_id"] = json!("@mallory:hs");
        assert!(matches!(
            verify_json(&obj, "@a:hs", "ed25519:DEV", &public),
            Err(SignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn test_missing_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let public = encode_b64(key.verifying_key().to_bytes());
        let obj = json!({ "k": "v" });
        assert!(matches!(
            verify_json(&obj, "@a:hs", "ed25519:DEV", &public),
            Err(SignatureError::MissingSignature { .. })
        ));
    }
}

//! Cross-signing key generation.
//!
//! The master key signs the self-signing and user-signing keys; the device
//! key additionally signs the master key so other devices can chain trust.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};

use strata_shared::keys::{CrossSigningKey, SigningKeysUploadRequest};
use strata_shared::signing::{encode_b64, sign_json};
use strata_shared::UserId;

use crate::account::{Account, CrossSigningSeeds};
use crate::error::CryptoError;

pub const USAGE_MASTER: &str = "master";
pub const USAGE_SELF_SIGNING: &str = "self_signing";
pub const USAGE_USER_SIGNING: &str = "user_signing";

pub fn generate_seeds() -> CrossSigningSeeds {
    CrossSigningSeeds {
        master: SigningKey::generate(&mut OsRng).to_bytes(),
        self_signing: SigningKey::generate(&mut OsRng).to_bytes(),
        user_signing: SigningKey::generate(&mut OsRng).to_bytes(),
    }
}

fn key_id(key: &SigningKey) -> (String, String) {
    let public = encode_b64(key.verifying_key().to_bytes());
    (format!("ed25519:{public}"), public)
}

fn unsigned_key(user_id: &UserId, usage: &str, key: &SigningKey) -> Value {
    let (id, public) = key_id(key);
    json!({
        "user_id": user_id,
        "usage": [usage],
        "keys": { id: public },
    })
}

/// Build the upload body for a set of seeds, signed as described above.
pub fn signing_keys_request(
    account: &Account,
    seeds: &CrossSigningSeeds,
) -> Result<SigningKeysUploadRequest, CryptoError> {
    let user_id = account.user_id();
    let master = SigningKey::from_bytes(&seeds.master);
    let self_signing = SigningKey::from_bytes(&seeds.self_signing);
    let user_signing = SigningKey::from_bytes(&seeds.user_signing);
    let (master_id, _) = key_id(&master);

    let mut master_key = unsigned_key(user_id, USAGE_MASTER, &master);
    account.sign_json(&mut master_key)?;

    let mut ssk = unsigned_key(user_id, USAGE_SELF_SIGNING, &self_signing);
    sign_json(&master, user_id.as_str(), &master_id, &mut ssk)?;

    let mut usk = unsigned_key(user_id, USAGE_USER_SIGNING, &user_signing);
    sign_json(&master, user_id.as_str(), &master_id, &mut usk)?;

    Ok(SigningKeysUploadRequest {
        master_key: Some(serde_json::from_value::<CrossSigningKey>(master_key)?),
        self_signing_key: Some(serde_json::from_value(ssk)?),
        user_signing_key: Some(serde_json::from_value(usk)?),
        auth: None,
    })
}

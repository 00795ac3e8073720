//! The local device account: identity keys, one-time keys and the pairwise
//! session keys established with other devices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use x25519_dalek::{PublicKey, StaticSecret};

use strata_shared::constants::{MAX_ONE_TIME_KEYS, SIGNED_CURVE25519};
use strata_shared::keys::{DeviceKeys, OneTimeKey, SignedKey};
use strata_shared::signing::{decode_b64, encode_b64, sign_json};
use strata_shared::{DeviceId, UserId};
use strata_store::SharedDatabase;

use crate::cipher::{derive_pairwise_key, SymmetricKey};
use crate::error::CryptoError;
use crate::{LOCAL_GROUP_ALGORITHM, LOCAL_OLM_ALGORITHM};

pub type SharedAccount = Arc<Mutex<Account>>;

pub fn lock_account(account: &SharedAccount) -> MutexGuard<'_, Account> {
    account.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persist the account pickle. The account lock is released before the
/// store is locked.
pub fn save_account(db: &SharedDatabase, account: &SharedAccount) -> Result<(), CryptoError> {
    let pickle = serde_json::to_string(&lock_account(account).pickle())?;
    strata_store::lock(db).tables().save_account_pickle(&pickle)?;
    Ok(())
}

/// Seeds of the cross-signing keys, present once bootstrapped.
#[derive(Clone, Serialize, Deserialize)]
pub struct CrossSigningSeeds {
    pub master: [u8; 32],
    pub self_signing: [u8; 32],
    pub user_signing: [u8; 32],
}

/// Serializable form of an [`Account`], persisted as JSON in the store.
#[derive(Serialize, Deserialize)]
pub struct AccountPickle {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub signing_key: [u8; 32],
    pub identity_key: [u8; 32],
    pub one_time_keys: BTreeMap<String, [u8; 32]>,
    pub published: BTreeSet<String>,
    pub next_key_id: u64,
    pub device_keys_uploaded: bool,
    /// peer curve25519 key -> channel key
    pub sessions: BTreeMap<String, [u8; 32]>,
    /// peer curve25519 key -> their one-time key, until they answer
    #[serde(default)]
    pub pending_prekeys: BTreeMap<String, String>,
    pub cross_signing: Option<CrossSigningSeeds>,
}

pub struct Account {
    user_id: UserId,
    device_id: DeviceId,
    signing_key: SigningKey,
    identity_key: StaticSecret,
    one_time_keys: BTreeMap<String, StaticSecret>,
    published: BTreeSet<String>,
    next_key_id: u64,
    device_keys_uploaded: bool,
    sessions: BTreeMap<String, SymmetricKey>,
    pending_prekeys: BTreeMap<String, String>,
    cross_signing: Option<CrossSigningSeeds>,
}

fn parse_curve_key(key_b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes: [u8; 32] = decode_b64(key_b64)?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(key_b64.to_string()))?;
    Ok(PublicKey::from(bytes))
}

impl Account {
    pub fn generate(user_id: UserId, device_id: DeviceId) -> Self {
        Self {
            user_id,
            device_id,
            signing_key: SigningKey::generate(&mut OsRng),
            identity_key: StaticSecret::random_from_rng(OsRng),
            one_time_keys: BTreeMap::new(),
            published: BTreeSet::new(),
            next_key_id: 0,
            device_keys_uploaded: false,
            sessions: BTreeMap::new(),
            pending_prekeys: BTreeMap::new(),
            cross_signing: None,
        }
    }

    pub fn from_pickle(pickle: AccountPickle) -> Self {
        Self {
            user_id: pickle.user_id,
            device_id: pickle.device_id,
            signing_key: SigningKey::from_bytes(&pickle.signing_key),
            identity_key: StaticSecret::from(pickle.identity_key),
            one_time_keys: pickle
                .one_time_keys
                .into_iter()
                .map(|(id, secret)| (id, StaticSecret::from(secret)))
                .collect(),
            published: pickle.published,
            next_key_id: pickle.next_key_id,
            device_keys_uploaded: pickle.device_keys_uploaded,
            sessions: pickle.sessions,
            pending_prekeys: pickle.pending_prekeys,
            cross_signing: pickle.cross_signing,
        }
    }

    pub fn pickle(&self) -> AccountPickle {
        AccountPickle {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            signing_key: self.signing_key.to_bytes(),
            identity_key: self.identity_key.to_bytes(),
            one_time_keys: self
                .one_time_keys
                .iter()
                .map(|(id, secret)| (id.clone(), secret.to_bytes()))
                .collect(),
            published: self.published.clone(),
            next_key_id: self.next_key_id,
            device_keys_uploaded: self.device_keys_uploaded,
            sessions: self.sessions.clone(),
            pending_prekeys: self.pending_prekeys.clone(),
            cross_signing: self.cross_signing.clone(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn ed25519_key(&self) -> String {
        encode_b64(self.signing_key.verifying_key().to_bytes())
    }

    pub fn curve25519_key(&self) -> String {
        encode_b64(PublicKey::from(&self.identity_key).as_bytes())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Sign `value` with the device key.
    pub fn sign_json(&self, value: &mut Value) -> Result<(), CryptoError> {
        let key_id = format!("ed25519:{}", self.device_id);
        sign_json(&self.signing_key, self.user_id.as_str(), &key_id, value)?;
        Ok(())
    }

    /// The self-signed device keys object advertised to the server.
    pub fn device_keys(&self) -> Result<DeviceKeys, CryptoError> {
        let mut value = json!({
            "user_id": self.user_id,
            "device_id": self.device_id,
            "algorithms": [LOCAL_OLM_ALGORITHM, LOCAL_GROUP_ALGORITHM],
            "keys": {
                format!("curve25519:{}", self.device_id): self.curve25519_key(),
                format!("ed25519:{}", self.device_id): self.ed25519_key(),
            },
        });
        self.sign_json(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn device_keys_uploaded(&self) -> bool {
        self.device_keys_uploaded
    }

    pub fn mark_device_keys_uploaded(&mut self) {
        self.device_keys_uploaded = true;
    }

    // --- one-time keys ---

    pub fn max_one_time_keys(&self) -> u64 {
        MAX_ONE_TIME_KEYS
    }

    pub fn generate_one_time_keys(&mut self, count: u64) {
        for _ in 0..count {
            let key_id = format!("AAAA{:06X}", self.next_key_id);
            self.next_key_id += 1;
            self.one_time_keys
                .insert(key_id, StaticSecret::random_from_rng(OsRng));
        }
    }

    /// Signed one-time keys not yet acknowledged by the server, keyed by
    /// `signed_curve25519:<id>`.
    pub fn unpublished_one_time_keys(&self) -> Result<BTreeMap<String, OneTimeKey>, CryptoError> {
        let mut keys = BTreeMap::new();
        for (key_id, secret) in &self.one_time_keys {
            if self.published.contains(key_id) {
                continue;
            }
            let mut value = json!({ "key": encode_b64(PublicKey::from(secret).as_bytes()) });
            self.sign_json(&mut value)?;
            let signed: SignedKey = serde_json::from_value(value)?;
            keys.insert(
                format!("{SIGNED_CURVE25519}:{key_id}"),
                OneTimeKey::Signed(signed),
            );
        }
        Ok(keys)
    }

    pub fn mark_keys_as_published(&mut self) {
        self.published.extend(self.one_time_keys.keys().cloned());
    }

    pub fn unpublished_count(&self) -> usize {
        self.one_time_keys
            .keys()
            .filter(|id| !self.published.contains(*id))
            .count()
    }

    /// Remove and return the one-time key whose public half is `public_b64`.
    fn take_one_time_key(&mut self, public_b64: &str) -> Option<StaticSecret> {
        let key_id = self
            .one_time_keys
            .iter()
            .find(|(_, s)| encode_b64(PublicKey::from(*s).as_bytes()) == public_b64)
            .map(|(id, _)| id.clone())?;
        self.published.remove(&key_id);
        self.one_time_keys.remove(&key_id)
    }

    // --- pairwise sessions ---

    pub fn session_key(&self, peer_curve25519: &str) -> Option<SymmetricKey> {
        self.sessions.get(peer_curve25519).copied()
    }

    pub fn has_session_with(&self, peer_curve25519: &str) -> bool {
        self.sessions.contains_key(peer_curve25519)
    }

    /// Create the outbound channel to a device from its identity key and one
    /// of its claimed one-time keys.
    pub fn create_outbound_session(
        &mut self,
        peer_identity: &str,
        peer_one_time_key: &str,
    ) -> Result<SymmetricKey, CryptoError> {
        let identity = parse_curve_key(peer_identity)?;
        let one_time = parse_curve_key(peer_one_time_key)?;
        let key = derive_pairwise_key(&[
            self.identity_key.diffie_hellman(&one_time).as_bytes(),
            self.identity_key.diffie_hellman(&identity).as_bytes(),
        ]);
        self.sessions.insert(peer_identity.to_string(), key);
        self.pending_prekeys
            .insert(peer_identity.to_string(), peer_one_time_key.to_string());
        Ok(key)
    }

    /// The one-time key our messages to `peer_curve25519` must carry until
    /// the peer has used the channel.
    pub fn pending_prekey(&self, peer_curve25519: &str) -> Option<&str> {
        self.pending_prekeys.get(peer_curve25519).map(String::as_str)
    }

    pub fn confirm_session(&mut self, peer_curve25519: &str) {
        self.pending_prekeys.remove(peer_curve25519);
    }

    /// Accept the channel a peer created against one of our one-time keys.
    /// The key is consumed.
    pub fn create_inbound_session(
        &mut self,
        peer_identity: &str,
        one_time_key: &str,
    ) -> Result<SymmetricKey, CryptoError> {
        let identity = parse_curve_key(peer_identity)?;
        let secret = self
            .take_one_time_key(one_time_key)
            .ok_or_else(|| CryptoError::MissingSession(peer_identity.to_string()))?;
        let key = derive_pairwise_key(&[
            secret.diffie_hellman(&identity).as_bytes(),
            self.identity_key.diffie_hellman(&identity).as_bytes(),
        ]);
        self.sessions.insert(peer_identity.to_string(), key);
        self.pending_prekeys.remove(peer_identity);
        Ok(key)
    }

    // --- cross-signing ---

    pub fn cross_signing(&self) -> Option<&CrossSigningSeeds> {
        self.cross_signing.as_ref()
    }

    pub fn set_cross_signing(&mut self, seeds: CrossSigningSeeds) {
        self.cross_signing = Some(seeds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_shared::signing::verify_json;

    fn account(user: &str, device: &str) -> Account {
        Account::generate(UserId::parse(user).unwrap(), DeviceId::parse(device).unwrap())
    }

    #[test]
    fn test_device_keys_are_self_signed() {
        let acct = account("@alice:example.org", "ALICE");
        let keys = acct.device_keys().unwrap();
        assert_eq!(keys.ed25519_key(), Some(acct.ed25519_key().as_str()));

        let value = serde_json::to_value(&keys).unwrap();
        verify_json(&value, "@alice:example.org", "ed25519:ALICE", &acct.ed25519_key()).unwrap();
    }

    #[test]
    fn test_one_time_key_publication() {
        let mut acct = account("@alice:example.org", "ALICE");
        acct.generate_one_time_keys(3);
        assert_eq!(acct.unpublished_one_time_keys().unwrap().len(), 3);

        acct.mark_keys_as_published();
        assert!(acct.unpublished_one_time_keys().unwrap().is_empty());

        acct.generate_one_time_keys(2);
        let fresh = acct.unpublished_one_time_keys().unwrap();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.keys().all(|k| k.starts_with("signed_curve25519:")));
    }

    #[test]
    fn test_pairwise_channel_agrees_and_consumes_key() {
        let mut alice = account("@alice:example.org", "ALICE");
        let mut bob = account("@bob:example.org", "BOB");
        bob.generate_one_time_keys(1);
        let otk = bob
            .unpublished_one_time_keys()
            .unwrap()
            .into_values()
            .next()
            .unwrap();

        let outbound = alice
            .create_outbound_session(&bob.curve25519_key(), otk.key())
            .unwrap();
        let inbound = bob
            .create_inbound_session(&alice.curve25519_key(), otk.key())
            .unwrap();
        assert_eq!(outbound, inbound);
        assert_eq!(alice.pending_prekey(&bob.curve25519_key()), Some(otk.key()));

        // the one-time key is gone
        assert!(bob
            .create_inbound_session(&alice.curve25519_key(), otk.key())
            .is_err());
    }

    #[test]
    fn test_pickle_roundtrip() {
        let mut acct = account("@alice:example.org", "ALICE");
        acct.generate_one_time_keys(2);
        acct.mark_device_keys_uploaded();

        let json = serde_json::to_string(&acct.pickle()).unwrap();
        let restored = Account::from_pickle(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.ed25519_key(), acct.ed25519_key());
        assert_eq!(restored.curve25519_key(), acct.curve25519_key());
        assert!(restored.device_keys_uploaded());
        assert_eq!(restored.unpublished_count(), 2);
    }
}

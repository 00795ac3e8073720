//! Key maintenance: keeping our published keys topped up, downloading
//! outdated device lists, establishing pairwise sessions and sharing room
//! keys.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use strata_net::Transport;
use strata_shared::constants::{EVENT_ROOM_ENCRYPTED, EVENT_ROOM_KEY, SIGNED_CURVE25519};
use strata_shared::keys::{DeviceKeys, KeysUploadRequest, OneTimeKey, SendToDeviceRequest};
use strata_shared::signing::verify_json;
use strata_shared::{DeviceId, RoomId, TransactionId, UserId};
use strata_store::SharedDatabase;

use crate::account::{lock_account, save_account, SharedAccount};
use crate::cross_signing::{
    generate_seeds, signing_keys_request, USAGE_MASTER, USAGE_SELF_SIGNING, USAGE_USER_SIGNING,
};
use crate::device_list::DeviceListTracker;
use crate::error::{KeyExchangeError, Result};
use crate::locks::DeviceLocks;
use crate::service::CryptoService;
use crate::tasks::{
    claim_one_time_keys, send_to_device, upload_keys, upload_signing_keys, PasswordAuth,
};

/// Timeout passed to the server for federated claims.
const CLAIM_TIMEOUT_MS: u64 = 10_000;

/// Devices a session could not be established with.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MissingSessions {
    pub no_one_time_key: Vec<(UserId, DeviceId)>,
    pub invalid_one_time_key: Vec<(UserId, DeviceId)>,
}

pub struct KeyManager {
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn CryptoService>,
    account: SharedAccount,
    db: SharedDatabase,
    devices: DeviceListTracker,
    locks: DeviceLocks,
    server_key_count: Mutex<Option<u64>>,
    credentials: Option<PasswordAuth>,
}

impl KeyManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        crypto: Arc<dyn CryptoService>,
        account: SharedAccount,
        db: SharedDatabase,
        credentials: Option<PasswordAuth>,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            crypto,
            account,
            devices: DeviceListTracker::new(db.clone())?,
            db,
            locks: DeviceLocks::new(),
            server_key_count: Mutex::new(None),
            credentials,
        })
    }

    pub fn device_lists(&self) -> &DeviceListTracker {
        &self.devices
    }

    fn own_identity(&self) -> (UserId, DeviceId) {
        let account = lock_account(&self.account);
        (account.user_id().clone(), account.device_id().clone())
    }

    /// Record the server's one-time key count from a sync response.
    pub fn update_one_time_key_counts(&self, counts: &BTreeMap<String, u64>) {
        let count = counts.get(SIGNED_CURVE25519).copied().unwrap_or(0);
        *self
            .server_key_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(count);
    }

    fn server_key_count(&self) -> Option<u64> {
        *self
            .server_key_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Upload device keys if they were never published and top up one-time
    /// keys once the server holds fewer than half the maximum. Returns
    /// whether anything was uploaded.
    pub async fn upload_keys_if_needed(&self) -> Result<bool> {
        let request = {
            let mut account = lock_account(&self.account);
            let device_keys = if account.device_keys_uploaded() {
                None
            } else {
                Some(account.device_keys()?)
            };

            let threshold = account.max_one_time_keys() / 2;
            let known_count = match self.server_key_count() {
                Some(count) => Some(count),
                // before the first sync the count is only known for a fresh device
                None if device_keys.is_some() => Some(0),
                None => None,
            };
            if let Some(count) = known_count {
                let pending = account.unpublished_count() as u64;
                if count + pending < threshold {
                    let needed = threshold - count - pending;
                    debug!(server_count = count, generating = needed, "replenishing one-time keys");
                    account.generate_one_time_keys(needed);
                }
            }

            KeysUploadRequest {
                device_keys,
                one_time_keys: account.unpublished_one_time_keys()?,
            }
        };

        if request.device_keys.is_none() && request.one_time_keys.is_empty() {
            return Ok(false);
        }

        let counts = upload_keys(self.transport.as_ref(), &request).await?;
        {
            let mut account = lock_account(&self.account);
            if request.device_keys.is_some() {
                account.mark_device_keys_uploaded();
            }
            account.mark_keys_as_published();
        }
        save_account(&self.db, &self.account)?;
        self.update_one_time_key_counts(&counts);
        info!(
            one_time_keys = request.one_time_keys.len(),
            device_keys = request.device_keys.is_some(),
            "published keys"
        );
        Ok(true)
    }

    /// Post-sync maintenance: the key upload and the device-list download
    /// run concurrently. Both are attempted; the first error is returned.
    pub async fn run_maintenance(&self, sync_token: Option<&str>) -> Result<()> {
        let (upload, download) = tokio::join!(
            self.upload_keys_if_needed(),
            self.devices
                .download_outdated(self.transport.as_ref(), sync_token)
        );
        if let Err(e) = &upload {
            warn!(error = %e, "one-time key upload failed");
        }
        if let Err(e) = &download {
            warn!(error = %e, "device list download failed");
        }
        upload?;
        download?;
        Ok(())
    }

    /// Known devices of `users` other than our own.
    fn devices_of(&self, users: &[UserId]) -> Result<Vec<DeviceKeys>> {
        let (own_user, own_device) = self.own_identity();
        let db = strata_store::lock(&self.db);
        let tables = db.tables();
        let mut devices = Vec::new();
        for user in users {
            devices.extend(
                tables
                    .devices_for_user(user)?
                    .into_iter()
                    .filter(|d| !(d.user_id == own_user && d.device_id == own_device)),
            );
        }
        Ok(devices)
    }

    fn verify_one_time_key(device: &DeviceKeys, key_id: &str, key: &OneTimeKey) -> bool {
        let OneTimeKey::Signed(signed) = key else {
            return false;
        };
        let Some(ed25519) = device.ed25519_key() else {
            return false;
        };
        let Ok(value) = serde_json::to_value(signed) else {
            return false;
        };
        let signed_ok = verify_json(
            &value,
            device.user_id.as_str(),
            &format!("ed25519:{}", device.device_id),
            ed25519,
        )
        .is_ok();
        if !signed_ok {
            debug!(user_id = %device.user_id, device_id = %device.device_id, key_id, "bad one-time key signature");
        }
        signed_ok
    }

    /// Make sure a pairwise session exists with every known device of
    /// `users`, claiming one-time keys where needed. Claims are serialised per
    /// device.
    pub async fn ensure_sessions(&self, users: &[UserId]) -> Result<MissingSessions> {
        let devices = self.devices_of(users)?;
        let without_session: Vec<&DeviceKeys> = devices
            .iter()
            .filter(|d| {
                d.curve25519_key()
                    .is_some_and(|k| !self.crypto.has_session_with(k))
            })
            .collect();
        if without_session.is_empty() {
            return Ok(MissingSessions::default());
        }

        let _guards = self
            .locks
            .acquire(without_session.iter().map(|d| (&d.user_id, &d.device_id)))
            .await;

        // Another caller may have finished while we waited.
        let to_claim: BTreeMap<(UserId, DeviceId), &DeviceKeys> = without_session
            .into_iter()
            .filter(|d| {
                d.curve25519_key()
                    .is_some_and(|k| !self.crypto.has_session_with(k))
            })
            .map(|d| ((d.user_id.clone(), d.device_id.clone()), d))
            .collect();
        if to_claim.is_empty() {
            return Ok(MissingSessions::default());
        }

        let wanted: Vec<(UserId, DeviceId)> = to_claim.keys().cloned().collect();
        let claimed = match claim_one_time_keys(
            self.transport.as_ref(),
            &wanted,
            Some(CLAIM_TIMEOUT_MS),
        )
        .await
        {
            Ok(claimed) => claimed,
            Err(KeyExchangeError::NoOneTimeKeys(devices)) => {
                return Ok(MissingSessions {
                    no_one_time_key: devices,
                    invalid_one_time_key: Vec::new(),
                })
            }
            Err(e) => return Err(e),
        };

        let mut missing = MissingSessions {
            no_one_time_key: claimed.exhausted,
            invalid_one_time_key: Vec::new(),
        };
        for (id, (key_id, key)) in &claimed.keys {
            let Some(device) = to_claim.get(id) else {
                continue;
            };
            if !Self::verify_one_time_key(device, key_id, key) {
                missing.invalid_one_time_key.push(id.clone());
                continue;
            }
            self.crypto.create_session(device, key.key()).await?;
        }
        Ok(missing)
    }

    /// Share the room's outbound session with every device of `users` over
    /// pairwise channels. Returns the devices that could not be reached.
    pub async fn share_room_key(&self, room_id: &RoomId, users: &[UserId]) -> Result<MissingSessions> {
        let missing = self.ensure_sessions(users).await?;
        let content = self.crypto.room_key_content(room_id).await?;

        let mut request = SendToDeviceRequest::default();
        for device in self.devices_of(users)? {
            let has_session = device
                .curve25519_key()
                .is_some_and(|k| self.crypto.has_session_with(k));
            if !has_session {
                continue;
            }
            let encrypted: Value = self
                .crypto
                .encrypt_to_device(&device, EVENT_ROOM_KEY, &content)
                .await?;
            request
                .messages
                .entry(device.user_id.to_string())
                .or_default()
                .insert(device.device_id.to_string(), encrypted);
        }

        let txn_id = TransactionId::generate();
        send_to_device(self.transport.as_ref(), EVENT_ROOM_ENCRYPTED, &txn_id, &request).await?;
        Ok(missing)
    }

    /// Generate (or reuse) cross-signing keys and publish them.
    pub async fn bootstrap_cross_signing(&self) -> Result<()> {
        let (request, seeds) = {
            let account = lock_account(&self.account);
            let seeds = account.cross_signing().cloned().unwrap_or_else(generate_seeds);
            (signing_keys_request(&account, &seeds)?, seeds)
        };

        upload_signing_keys(self.transport.as_ref(), &request, self.credentials.as_ref()).await?;

        lock_account(&self.account).set_cross_signing(seeds);
        save_account(&self.db, &self.account)?;

        let db = strata_store::lock(&self.db);
        let tables = db.tables();
        for (usage, key) in [
            (USAGE_MASTER, &request.master_key),
            (USAGE_SELF_SIGNING, &request.self_signing_key),
            (USAGE_USER_SIGNING, &request.user_signing_key),
        ] {
            if let Some(key) = key {
                tables.upsert_cross_signing_key(usage, key)?;
            }
        }
        Ok(())
    }
}

//! Tracking of other users' device lists.
//!
//! A user is tracked once we share an encrypted room with them. Sync
//! notifications move tracked users back to `PendingDownload`; key
//! maintenance downloads them, validates every device and caches the
//! result with the sync token as watermark.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use strata_net::Transport;
use strata_shared::keys::{CrossSigningKey, DeviceKeys};
use strata_shared::signing::verify_json;
use strata_shared::{DeviceId, UserId};
use strata_store::{SharedDatabase, Tables, TrackingStatus};

use crate::error::Result;
use crate::tasks::download_device_keys;

/// How long a server that answered 503 is left alone.
const UNREACHABLE_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Mark users as tracked. Users already tracked keep their status.
pub fn track_users<'a>(
    tables: Tables<'_>,
    users: impl IntoIterator<Item = &'a UserId>,
) -> strata_store::Result<usize> {
    let mut added = 0;
    for user in users {
        if !tables.tracking_status(user)?.is_tracked() {
            tables.set_tracking_status(user, TrackingStatus::PendingDownload)?;
            added += 1;
        }
    }
    Ok(added)
}

/// Apply the `device_lists` section of a sync response.
pub fn handle_device_list_changes(
    tables: Tables<'_>,
    changed: &[String],
    left: &[String],
) -> strata_store::Result<()> {
    for user in changed {
        let Ok(user) = UserId::parse(user.as_str()) else {
            warn!(user_id = %user, "ignoring malformed user id in device_lists.changed");
            continue;
        };
        if tables.tracking_status(&user)?.is_tracked() {
            debug!(user_id = %user, "device list changed");
            tables.set_tracking_status(&user, TrackingStatus::PendingDownload)?;
        }
    }
    for user in left {
        let Ok(user) = UserId::parse(user.as_str()) else {
            continue;
        };
        if tables.tracking_status(&user)?.is_tracked() {
            debug!(user_id = %user, "no longer sharing an encrypted room");
            tables.set_tracking_status(&user, TrackingStatus::NotTracked)?;
        }
    }
    Ok(())
}

/// Why a downloaded device was rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum InvalidDevice {
    Malformed(String),
    IdMismatch,
    MissingSigningKey,
    BadSignature,
    SigningKeyChanged,
}

/// Validate one downloaded device against the one we already know.
pub fn validate_device_keys(
    user_id: &UserId,
    device_id: &str,
    raw: &Value,
    known: Option<&DeviceKeys>,
) -> std::result::Result<DeviceKeys, InvalidDevice> {
    let keys: DeviceKeys = serde_json::from_value(raw.clone())
        .map_err(|e| InvalidDevice::Malformed(e.to_string()))?;
    if &keys.user_id != user_id || keys.device_id.as_str() != device_id {
        return Err(InvalidDevice::IdMismatch);
    }
    let ed25519 = keys.ed25519_key().ok_or(InvalidDevice::MissingSigningKey)?;
    verify_json(
        raw,
        user_id.as_str(),
        &format!("ed25519:{device_id}"),
        ed25519,
    )
    .map_err(|_| InvalidDevice::BadSignature)?;

    if let Some(known) = known {
        if known.ed25519_key() != Some(ed25519) {
            return Err(InvalidDevice::SigningKeyChanged);
        }
    }
    Ok(keys)
}

pub struct DeviceListTracker {
    db: SharedDatabase,
    /// server name -> when it answered 503
    unreachable: Mutex<HashMap<String, Instant>>,
}

impl DeviceListTracker {
    /// Downloads cut short by a previous shutdown are queued again.
    pub fn new(db: SharedDatabase) -> Result<Self> {
        let reset = strata_store::lock(&db).tables().reset_interrupted_downloads()?;
        if reset > 0 {
            info!(users = reset, "re-queued interrupted device list downloads");
        }
        Ok(Self {
            db,
            unreachable: Mutex::new(HashMap::new()),
        })
    }

    fn unreachable(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.unreachable
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Users due for a download, including those on servers whose back-off
    /// has elapsed.
    pub fn outdated_users(&self) -> Result<Vec<UserId>> {
        let db = strata_store::lock(&self.db);
        let tables = db.tables();

        let mut unreachable = self.unreachable();
        unreachable.retain(|_, since| since.elapsed() < UNREACHABLE_RETRY_AFTER);
        for user in tables.users_with_tracking_status(TrackingStatus::UnreachableServer)? {
            if !unreachable.contains_key(user.server_name()) {
                tables.set_tracking_status(&user, TrackingStatus::PendingDownload)?;
            }
        }

        Ok(tables
            .users_with_tracking_status(TrackingStatus::PendingDownload)?
            .into_iter()
            .filter(|u| !unreachable.contains_key(u.server_name()))
            .collect())
    }

    /// Download and cache the device lists of every outdated user. Returns
    /// the users brought up to date.
    pub async fn download_outdated(
        &self,
        transport: &dyn Transport,
        token: Option<&str>,
    ) -> Result<Vec<UserId>> {
        let users = self.outdated_users()?;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        {
            let db = strata_store::lock(&self.db);
            let tables = db.tables();
            for user in &users {
                tables.set_tracking_status(user, TrackingStatus::DownloadInProgress)?;
            }
        }

        let response = match download_device_keys(transport, &users, token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, users = users.len(), "device key download failed");
                let db = strata_store::lock(&self.db);
                let tables = db.tables();
                for user in &users {
                    if tables.tracking_status(user)? == TrackingStatus::DownloadInProgress {
                        tables.set_tracking_status(user, TrackingStatus::PendingDownload)?;
                    }
                }
                return Err(e);
            }
        };

        let not_ready: BTreeSet<String> = response
            .failures
            .iter()
            .filter(|(_, failure)| failure.get("status").and_then(Value::as_u64) == Some(503))
            .map(|(server, _)| server.clone())
            .collect();
        if !not_ready.is_empty() {
            warn!(servers = ?not_ready, "servers not ready for key queries");
            let mut unreachable = self.unreachable();
            for server in &not_ready {
                unreachable.insert(server.clone(), Instant::now());
            }
        }

        let mut db = strata_store::lock(&self.db);
        let txn = db.transaction()?;
        let tables = txn.tables();
        let mut updated = Vec::new();

        for user in &users {
            // A change notification that arrived mid-download wins.
            if tables.tracking_status(user)? != TrackingStatus::DownloadInProgress {
                continue;
            }
            if not_ready.contains(user.server_name()) {
                tables.set_tracking_status(user, TrackingStatus::UnreachableServer)?;
                continue;
            }
            if response.failures.contains_key(user.server_name()) {
                tables.set_tracking_status(user, TrackingStatus::PendingDownload)?;
                continue;
            }

            let devices = response.device_keys.get(user.as_str());
            let mut keep: Vec<DeviceId> = Vec::new();
            for (device_id, raw) in devices.into_iter().flatten() {
                let Ok(parsed_id) = DeviceId::parse(device_id.as_str()) else {
                    continue;
                };
                let known = tables.device_keys(user, &parsed_id)?;
                match validate_device_keys(user, device_id, raw, known.as_ref()) {
                    Ok(keys) => tables.upsert_device_keys(&keys)?,
                    Err(reason) => {
                        warn!(user_id = %user, device_id = %device_id, ?reason, "rejected device keys");
                    }
                }
                keep.push(parsed_id);
            }
            tables.remove_devices_except(user, &keep)?;

            for (usage, keys) in [
                ("master", &response.master_keys),
                ("self_signing", &response.self_signing_keys),
                ("user_signing", &response.user_signing_keys),
            ] {
                if let Some(raw) = keys.get(user.as_str()) {
                    match serde_json::from_value::<CrossSigningKey>(raw.clone()) {
                        Ok(key) if &key.user_id == user => {
                            tables.upsert_cross_signing_key(usage, &key)?
                        }
                        _ => warn!(user_id = %user, usage, "ignoring malformed cross-signing key"),
                    }
                }
            }

            tables.set_tracking_status(user, TrackingStatus::UpToDate)?;
            tables.set_device_watermark(user, token)?;
            updated.push(user.clone());
        }
        txn.commit()?;

        debug!(updated = updated.len(), "device lists downloaded");
        Ok(updated)
    }
}

//! Device keys of other users, their download tracking and cross-signing
//! keys.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use strata_shared::keys::{CrossSigningKey, DeviceKeys};
use strata_shared::{DeviceId, UserId};

use crate::database::Tables;
use crate::error::{conversion_error, Result};
use crate::models::TrackingStatus;

impl Tables<'_> {
    pub fn upsert_device_keys(&self, keys: &DeviceKeys) -> Result<()> {
        self.conn.execute(
            "INSERT INTO device_keys (user_id, device_id, ed25519, curve25519, keys_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                 ed25519 = excluded.ed25519,
                 curve25519 = excluded.curve25519,
                 keys_json = excluded.keys_json,
                 updated_at = excluded.updated_at",
            params![
                keys.user_id.as_str(),
                keys.device_id.as_str(),
                keys.ed25519_key(),
                keys.curve25519_key(),
                serde_json::to_string(keys)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn device_keys(&self, user_id: &UserId, device_id: &DeviceId) -> Result<Option<DeviceKeys>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT keys_json FROM device_keys WHERE user_id = ?1 AND device_id = ?2",
                params![user_id.as_str(), device_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    pub fn devices_for_user(&self, user_id: &UserId) -> Result<Vec<DeviceKeys>> {
        let mut stmt = self.conn.prepare(
            "SELECT keys_json FROM device_keys WHERE user_id = ?1 ORDER BY device_id",
        )?;
        let rows = stmt.query_map(params![user_id.as_str()], |row| {
            let json: String = row.get(0)?;
            serde_json::from_str::<DeviceKeys>(&json).map_err(|e| conversion_error(0, e))
        })?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    /// Find the device owning a curve25519 identity key.
    pub fn device_by_curve25519(&self, curve25519: &str) -> Result<Option<DeviceKeys>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT keys_json FROM device_keys WHERE curve25519 = ?1 LIMIT 1",
                params![curve25519],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Drop devices of a user that the latest download no longer lists.
    pub fn remove_devices_except(&self, user_id: &UserId, keep: &[DeviceId]) -> Result<usize> {
        let mut removed = 0;
        for device in self.devices_for_user(user_id)? {
            if !keep.contains(&device.device_id) {
                removed += self.conn.execute(
                    "DELETE FROM device_keys WHERE user_id = ?1 AND device_id = ?2",
                    params![user_id.as_str(), device.device_id.as_str()],
                )?;
            }
        }
        Ok(removed)
    }

    // -- tracking ---------------------------------------------------------

    pub fn tracking_status(&self, user_id: &UserId) -> Result<TrackingStatus> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM device_tracking WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status
            .as_deref()
            .and_then(TrackingStatus::from_str)
            .unwrap_or(TrackingStatus::NotTracked))
    }

    pub fn set_tracking_status(&self, user_id: &UserId, status: TrackingStatus) -> Result<()> {
        self.conn.execute(
            "INSERT INTO device_tracking (user_id, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
            params![user_id.as_str(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn users_with_tracking_status(&self, status: TrackingStatus) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM device_tracking WHERE status = ?1 ORDER BY user_id")?;
        let rows = stmt.query_map(params![status.as_str()], |row| {
            let user: String = row.get(0)?;
            UserId::parse(user).map_err(|e| conversion_error(0, e))
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Downloads interrupted by a shutdown are retried on the next start.
    pub fn reset_interrupted_downloads(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE device_tracking SET status = ?1 WHERE status = ?2",
            params![
                TrackingStatus::PendingDownload.as_str(),
                TrackingStatus::DownloadInProgress.as_str()
            ],
        )?)
    }

    pub fn device_watermark(&self, user_id: &UserId) -> Result<Option<String>> {
        let watermark: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT watermark FROM device_tracking WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(watermark.flatten())
    }

    pub fn set_device_watermark(&self, user_id: &UserId, token: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE device_tracking SET watermark = ?2 WHERE user_id = ?1",
            params![user_id.as_str(), token],
        )?;
        Ok(())
    }

    // -- cross-signing ----------------------------------------------------

    pub fn upsert_cross_signing_key(&self, usage: &str, key: &CrossSigningKey) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cross_signing_keys (user_id, usage, key_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, usage) DO UPDATE SET key_json = excluded.key_json",
            params![key.user_id.as_str(), usage, serde_json::to_string(key)?],
        )?;
        Ok(())
    }

    pub fn cross_signing_key(&self, user_id: &UserId, usage: &str) -> Result<Option<CrossSigningKey>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT key_json FROM cross_signing_keys WHERE user_id = ?1 AND usage = ?2",
                params![user_id.as_str(), usage],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }
}

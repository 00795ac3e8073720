//! Local device account pickle and inbound group sessions.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use strata_shared::RoomId;

use crate::database::Tables;
use crate::error::{conversion_error, Result};
use crate::models::InboundGroupSessionRecord;

impl Tables<'_> {
    pub fn save_account_pickle(&self, pickle: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO crypto_account (id, pickle, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET pickle = excluded.pickle, updated_at = excluded.updated_at",
            params![pickle, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn account_pickle(&self) -> Result<Option<String>> {
        let pickle = self
            .conn
            .query_row("SELECT pickle FROM crypto_account WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(pickle)
    }

    /// Store a session unless one with the same id is already known; the
    /// first copy wins so a forwarded key cannot replace a direct one.
    pub fn insert_inbound_group_session(&self, session: &InboundGroupSessionRecord) -> Result<bool> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO inbound_group_sessions
                 (room_id, session_id, sender_key, signing_key, session_key, forwarding_chain, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.room_id.as_str(),
                session.session_id,
                session.sender_key,
                session.signing_key,
                session.session_key,
                serde_json::to_string(&session.forwarding_chain)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn inbound_group_session(
        &self,
        room_id: &RoomId,
        session_id: &str,
    ) -> Result<Option<InboundGroupSessionRecord>> {
        let session = self
            .conn
            .query_row(
                "SELECT room_id, session_id, sender_key, signing_key, session_key, forwarding_chain
                 FROM inbound_group_sessions WHERE room_id = ?1 AND session_id = ?2",
                params![room_id.as_str(), session_id],
                |row| {
                    let room_id: String = row.get(0)?;
                    let chain: String = row.get(5)?;
                    Ok(InboundGroupSessionRecord {
                        room_id: RoomId::parse(room_id).map_err(|e| conversion_error(0, e))?,
                        session_id: row.get(1)?,
                        sender_key: row.get(2)?,
                        signing_key: row.get(3)?,
                        session_key: row.get(4)?,
                        forwarding_chain: serde_json::from_str(&chain)
                            .map_err(|e| conversion_error(5, e))?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn delete_inbound_group_session(&self, room_id: &RoomId, session_id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM inbound_group_sessions WHERE room_id = ?1 AND session_id = ?2",
            params![room_id.as_str(), session_id],
        )?;
        Ok(affected > 0)
    }
}

//! Global and per-room account data, room tags and read receipts.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use strata_shared::RoomId;

use crate::database::Tables;
use crate::error::{conversion_error, Result};
use crate::models::{ReadReceipt, RoomTag};

// Global account data is stored under the empty room id.
const GLOBAL: &str = "";

impl Tables<'_> {
    pub fn save_account_data(&self, room_id: Option<&RoomId>, event_type: &str, content: &Value) -> Result<()> {
        self.conn.execute(
            "INSERT INTO account_data (room_id, type, content) VALUES (?1, ?2, ?3)
             ON CONFLICT(room_id, type) DO UPDATE SET content = excluded.content",
            params![
                room_id.map(RoomId::as_str).unwrap_or(GLOBAL),
                event_type,
                content.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn account_data(&self, room_id: Option<&RoomId>, event_type: &str) -> Result<Option<Value>> {
        let content: Option<String> = self
            .conn
            .query_row(
                "SELECT content FROM account_data WHERE room_id = ?1 AND type = ?2",
                params![room_id.map(RoomId::as_str).unwrap_or(GLOBAL), event_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content.map(|c| serde_json::from_str(&c)).transpose()?)
    }

    /// Replace the whole tag set of a room.
    pub fn replace_room_tags(&self, room_id: &RoomId, tags: &[RoomTag]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM room_tags WHERE room_id = ?1",
            params![room_id.as_str()],
        )?;
        for tag in tags {
            self.conn.execute(
                "INSERT OR REPLACE INTO room_tags (room_id, tag, tag_order) VALUES (?1, ?2, ?3)",
                params![room_id.as_str(), tag.tag, tag.order],
            )?;
        }
        Ok(())
    }

    pub fn room_tags(&self, room_id: &RoomId) -> Result<Vec<RoomTag>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag, tag_order FROM room_tags WHERE room_id = ?1 ORDER BY tag_order, tag",
        )?;
        let rows = stmt.query_map(params![room_id.as_str()], |row| {
            Ok(RoomTag {
                tag: row.get(0)?,
                order: row.get(1)?,
            })
        })?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    pub fn upsert_read_receipt(&self, receipt: &ReadReceipt) -> Result<()> {
        self.conn.execute(
            "INSERT INTO read_receipts (room_id, user_id, receipt_type, event_id, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(room_id, user_id, receipt_type) DO UPDATE SET
                 event_id = excluded.event_id,
                 ts = excluded.ts",
            params![
                receipt.room_id.as_str(),
                receipt.user_id.as_str(),
                receipt.receipt_type,
                receipt.event_id.as_str(),
                receipt.ts,
            ],
        )?;
        Ok(())
    }

    pub fn read_receipts(&self, room_id: &RoomId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT room_id, user_id, receipt_type, event_id, ts FROM read_receipts
             WHERE room_id = ?1 ORDER BY user_id, receipt_type",
        )?;
        let rows = stmt.query_map(params![room_id.as_str()], |row| {
            let room_id: String = row.get(0)?;
            let user_id: String = row.get(1)?;
            let event_id: String = row.get(3)?;
            Ok(ReadReceipt {
                room_id: RoomId::parse(room_id).map_err(|e| conversion_error(0, e))?,
                user_id: user_id.try_into().map_err(|e| conversion_error(1, e))?,
                receipt_type: row.get(2)?,
                event_id: event_id.try_into().map_err(|e| conversion_error(3, e))?,
                ts: row.get(4)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}

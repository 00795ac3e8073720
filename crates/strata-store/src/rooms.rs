use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use strata_shared::{EventId, Membership, RoomId};

use crate::database::Tables;
use crate::error::{conversion_error, Result};
use crate::models::RoomSummary;

const ROOM_COLUMNS: &str = "room_id, membership, display_name, name, topic, avatar_url, \
     canonical_alias, room_type, heroes, joined_member_count, invited_member_count, \
     highlight_count, notification_count, latest_event_id, is_encrypted, is_direct, \
     typing_users, fully_read";

impl Tables<'_> {
    /// Membership last recorded for a room, `None` for unknown rooms.
    pub fn membership(&self, room_id: &RoomId) -> Result<Option<Membership>> {
        let membership: Option<String> = self
            .conn
            .query_row(
                "SELECT membership FROM rooms WHERE room_id = ?1",
                params![room_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(membership.as_deref().and_then(Membership::from_str))
    }

    /// Create the room row if needed and record the membership.
    pub fn set_membership(&self, room_id: &RoomId, membership: Membership) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (room_id, membership, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(room_id) DO UPDATE SET
                 membership = excluded.membership,
                 updated_at = excluded.updated_at",
            params![room_id.as_str(), membership.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn room_summary(&self, room_id: &RoomId) -> Result<Option<RoomSummary>> {
        let summary = self
            .conn
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = ?1"),
                params![room_id.as_str()],
                row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    pub fn rooms_with_membership(&self, membership: Membership) -> Result<Vec<RoomSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE membership = ?1 ORDER BY room_id"
        ))?;
        let rows = stmt.query_map(params![membership.as_str()], row_to_summary)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    pub fn save_room_summary(&self, summary: &RoomSummary) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (room_id, membership, display_name, name, topic, avatar_url,
                                canonical_alias, room_type, heroes, joined_member_count,
                                invited_member_count, highlight_count, notification_count,
                                latest_event_id, is_encrypted, is_direct, typing_users,
                                fully_read, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(room_id) DO UPDATE SET
                 membership = excluded.membership,
                 display_name = excluded.display_name,
                 name = excluded.name,
                 topic = excluded.topic,
                 avatar_url = excluded.avatar_url,
                 canonical_alias = excluded.canonical_alias,
                 room_type = excluded.room_type,
                 heroes = excluded.heroes,
                 joined_member_count = excluded.joined_member_count,
                 invited_member_count = excluded.invited_member_count,
                 highlight_count = excluded.highlight_count,
                 notification_count = excluded.notification_count,
                 latest_event_id = excluded.latest_event_id,
                 is_encrypted = excluded.is_encrypted,
                 is_direct = excluded.is_direct,
                 typing_users = excluded.typing_users,
                 fully_read = excluded.fully_read,
                 updated_at = excluded.updated_at",
            params![
                summary.room_id.as_str(),
                summary.membership.as_str(),
                summary.display_name,
                summary.name,
                summary.topic,
                summary.avatar_url,
                summary.canonical_alias,
                summary.room_type,
                serde_json::to_string(&summary.heroes)?,
                summary.joined_member_count as i64,
                summary.invited_member_count as i64,
                summary.highlight_count as i64,
                summary.notification_count as i64,
                summary.latest_event_id.as_ref().map(EventId::as_str),
                summary.is_encrypted,
                summary.is_direct,
                serde_json::to_string(&summary.typing_users)?,
                summary.fully_read,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_typing_users(&self, room_id: &RoomId, users: &[String]) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET typing_users = ?2 WHERE room_id = ?1",
            params![room_id.as_str(), serde_json::to_string(users)?],
        )?;
        Ok(())
    }

    pub fn set_fully_read(&self, room_id: &RoomId, event_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET fully_read = ?2 WHERE room_id = ?1",
            params![room_id.as_str(), event_id],
        )?;
        Ok(())
    }

    /// Flag exactly the given rooms as direct chats.
    pub fn set_direct_rooms(&self, room_ids: &[RoomId]) -> Result<()> {
        self.conn.execute("UPDATE rooms SET is_direct = 0", [])?;
        for room_id in room_ids {
            self.conn.execute(
                "UPDATE rooms SET is_direct = 1 WHERE room_id = ?1",
                params![room_id.as_str()],
            )?;
        }
        Ok(())
    }
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<RoomSummary> {
    let room_id: String = row.get(0)?;
    let membership: String = row.get(1)?;
    let heroes: String = row.get(8)?;
    let latest_event_id: Option<String> = row.get(13)?;
    let typing: String = row.get(16)?;

    Ok(RoomSummary {
        room_id: RoomId::parse(room_id).map_err(|e| conversion_error(0, e))?,
        membership: Membership::from_str(&membership).unwrap_or(Membership::Left),
        display_name: row.get(2)?,
        name: row.get(3)?,
        topic: row.get(4)?,
        avatar_url: row.get(5)?,
        canonical_alias: row.get(6)?,
        room_type: row.get(7)?,
        heroes: serde_json::from_str(&heroes).map_err(|e| conversion_error(8, e))?,
        joined_member_count: row.get::<_, i64>(9)? as u64,
        invited_member_count: row.get::<_, i64>(10)? as u64,
        highlight_count: row.get::<_, i64>(11)? as u64,
        notification_count: row.get::<_, i64>(12)? as u64,
        latest_event_id: latest_event_id
            .map(EventId::parse)
            .transpose()
            .map_err(|e| conversion_error(13, e))?,
        is_encrypted: row.get(14)?,
        is_direct: row.get(15)?,
        typing_users: serde_json::from_str(&typing).map_err(|e| conversion_error(16, e))?,
        fully_read: row.get(17)?,
    })
}

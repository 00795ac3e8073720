//! Chunk records and the ordered event membership of each chunk.

use rusqlite::{params, OptionalExtension, Row};

use strata_shared::{EventId, RoomId};

use crate::database::Tables;
use crate::error::{conversion_error, not_found, Result};
use crate::events::{row_to_event, EVENT_COLUMNS};
use crate::models::{ChunkBounds, ChunkRecord, TimelineEvent};

const CHUNK_COLUMNS: &str =
    "chunk_id, room_id, prev_token, next_token, is_last_forward, is_last_backward";

impl Tables<'_> {
    pub fn create_chunk(
        &self,
        room_id: &RoomId,
        prev_token: Option<&str>,
        next_token: Option<&str>,
        is_last_forward: bool,
    ) -> Result<ChunkRecord> {
        self.conn.execute(
            "INSERT INTO chunks (room_id, prev_token, next_token, is_last_forward, is_last_backward)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![room_id.as_str(), prev_token, next_token, is_last_forward],
        )?;
        let chunk_id = self.conn.last_insert_rowid();

        tracing::debug!(room_id = %room_id, chunk_id, is_last_forward, "created chunk");

        Ok(ChunkRecord {
            chunk_id,
            room_id: room_id.clone(),
            prev_token: prev_token.map(str::to_string),
            next_token: next_token.map(str::to_string),
            is_last_forward,
            is_last_backward: false,
        })
    }

    pub fn get_chunk(&self, chunk_id: i64) -> Result<ChunkRecord> {
        self.conn
            .query_row(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_id = ?1"),
                params![chunk_id],
                row_to_chunk,
            )
            .map_err(not_found)
    }

    /// The chunk sync events are appended to, if the room has one.
    pub fn live_chunk(&self, room_id: &RoomId) -> Result<Option<ChunkRecord>> {
        let chunk = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     WHERE room_id = ?1 AND is_last_forward = 1"
                ),
                params![room_id.as_str()],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn chunks_for_room(&self, room_id: &RoomId) -> Result<Vec<ChunkRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE room_id = ?1 ORDER BY chunk_id"
        ))?;
        let rows = stmt.query_map(params![room_id.as_str()], row_to_chunk)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// The chunk whose forward end meets `token`, i.e. the chunk directly
    /// before a chunk whose `prev_token` is `token`.
    pub fn chunk_with_next_token(&self, room_id: &RoomId, token: &str) -> Result<Option<ChunkRecord>> {
        let chunk = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     WHERE room_id = ?1 AND next_token = ?2
                     ORDER BY chunk_id LIMIT 1"
                ),
                params![room_id.as_str(), token],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn set_chunk_last_forward(&self, chunk_id: i64, is_last_forward: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE chunks SET is_last_forward = ?2 WHERE chunk_id = ?1",
            params![chunk_id, is_last_forward],
        )?;
        Ok(())
    }

    /// Move the backward end of a chunk. A `None` token marks the start of
    /// history.
    pub fn set_chunk_prev_token(&self, chunk_id: i64, prev_token: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE chunks SET prev_token = ?2, is_last_backward = ?3 WHERE chunk_id = ?1",
            params![chunk_id, prev_token, prev_token.is_none()],
        )?;
        Ok(())
    }

    pub fn delete_chunk(&self, chunk_id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM chunks WHERE chunk_id = ?1", params![chunk_id])?;
        Ok(affected > 0)
    }

    /// Delete every chunk of a room. Event rows are left for
    /// [`Tables::prune_orphan_events`].
    pub fn delete_room_chunks(&self, room_id: &RoomId) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM chunks WHERE room_id = ?1", params![room_id.as_str()])?;
        Ok(removed)
    }

    // -- chunk membership -------------------------------------------------

    pub fn chunk_contains(&self, chunk_id: i64, event_id: &EventId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM chunk_events WHERE chunk_id = ?1 AND event_id = ?2",
                params![chunk_id, event_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn chunk_bounds(&self, chunk_id: i64) -> Result<Option<ChunkBounds>> {
        let bounds = self.conn.query_row(
            "SELECT MIN(display_index), MAX(display_index), MIN(state_index), MAX(state_index)
             FROM chunk_events WHERE chunk_id = ?1",
            params![chunk_id],
            |row| {
                let min_display: Option<i64> = row.get(0)?;
                Ok(match min_display {
                    Some(min_display_index) => Some(ChunkBounds {
                        min_display_index,
                        max_display_index: row.get(1)?,
                        min_state_index: row.get(2)?,
                        max_state_index: row.get(3)?,
                    }),
                    None => None,
                })
            },
        )?;
        Ok(bounds)
    }

    /// Place an event after every event of the chunk.
    pub fn append_to_chunk(&self, chunk_id: i64, event_id: &EventId, state_index: i64) -> Result<i64> {
        let display_index = self
            .chunk_bounds(chunk_id)?
            .map(|b| b.max_display_index + 1)
            .unwrap_or(0);
        self.insert_chunk_event(chunk_id, event_id, display_index, state_index)?;
        Ok(display_index)
    }

    /// Place an event before every event of the chunk.
    pub fn prepend_to_chunk(&self, chunk_id: i64, event_id: &EventId, state_index: i64) -> Result<i64> {
        let display_index = self
            .chunk_bounds(chunk_id)?
            .map(|b| b.min_display_index - 1)
            .unwrap_or(0);
        self.insert_chunk_event(chunk_id, event_id, display_index, state_index)?;
        Ok(display_index)
    }

    fn insert_chunk_event(
        &self,
        chunk_id: i64,
        event_id: &EventId,
        display_index: i64,
        state_index: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO chunk_events (chunk_id, event_id, display_index, state_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, event_id.as_str(), display_index, state_index],
        )?;
        Ok(())
    }

    /// Events of a chunk in display order.
    pub fn chunk_events(&self, chunk_id: i64) -> Result<Vec<TimelineEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ce.chunk_id, ce.display_index, ce.state_index, {EVENT_COLUMNS}
             FROM chunk_events ce JOIN events e ON e.event_id = ce.event_id
             WHERE ce.chunk_id = ?1
             ORDER BY ce.display_index"
        ))?;
        let rows = stmt.query_map(params![chunk_id], row_to_timeline_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// The most recent event of a chunk.
    pub fn last_chunk_event(&self, chunk_id: i64) -> Result<Option<TimelineEvent>> {
        let event = self
            .conn
            .query_row(
                &format!(
                    "SELECT ce.chunk_id, ce.display_index, ce.state_index, {EVENT_COLUMNS}
                     FROM chunk_events ce JOIN events e ON e.event_id = ce.event_id
                     WHERE ce.chunk_id = ?1
                     ORDER BY ce.display_index DESC LIMIT 1"
                ),
                params![chunk_id],
                row_to_timeline_event,
            )
            .optional()?;
        Ok(event)
    }

    /// Where an event sits in a room's chunks, if anywhere.
    pub fn timeline_position(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<Option<TimelineEvent>> {
        let event = self
            .conn
            .query_row(
                &format!(
                    "SELECT ce.chunk_id, ce.display_index, ce.state_index, {EVENT_COLUMNS}
                     FROM chunk_events ce
                     JOIN events e ON e.event_id = ce.event_id
                     JOIN chunks c ON c.chunk_id = ce.chunk_id
                     WHERE c.room_id = ?1 AND ce.event_id = ?2
                     ORDER BY c.is_last_forward DESC LIMIT 1"
                ),
                params![room_id.as_str(), event_id.as_str()],
                row_to_timeline_event,
            )
            .optional()?;
        Ok(event)
    }

    /// Move every event of `from` in front of `into`, keeping their order and
    /// shifting indices below those of `into`. `from` is deleted.
    pub fn merge_chunk_before(&self, from: i64, into: i64) -> Result<usize> {
        let source = self.get_chunk(from)?;
        let target_bounds = self.chunk_bounds(into)?;
        let source_bounds = self.chunk_bounds(from)?;

        let moved = match (source_bounds, target_bounds) {
            (Some(src), Some(dst)) => {
                let display_shift = dst.min_display_index - 1 - src.max_display_index;
                let state_shift = dst.min_state_index - 1 - src.max_state_index;
                self.conn.execute(
                    "INSERT OR IGNORE INTO chunk_events (chunk_id, event_id, display_index, state_index)
                     SELECT ?2, event_id, display_index + ?3, state_index + ?4
                     FROM chunk_events WHERE chunk_id = ?1",
                    params![from, into, display_shift, state_shift],
                )?
            }
            (Some(_), None) => self.conn.execute(
                "INSERT OR IGNORE INTO chunk_events (chunk_id, event_id, display_index, state_index)
                 SELECT ?2, event_id, display_index, state_index
                 FROM chunk_events WHERE chunk_id = ?1",
                params![from, into],
            )?,
            (None, _) => 0,
        };

        self.conn.execute(
            "UPDATE chunks SET prev_token = ?2, is_last_backward = ?3 WHERE chunk_id = ?1",
            params![into, source.prev_token, source.is_last_backward],
        )?;
        self.delete_chunk(from)?;

        tracing::debug!(from, into, moved, "merged adjacent chunks");

        Ok(moved)
    }
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let room_id: String = row.get(1)?;
    Ok(ChunkRecord {
        chunk_id: row.get(0)?,
        room_id: RoomId::parse(room_id).map_err(|e| conversion_error(1, e))?,
        prev_token: row.get(2)?,
        next_token: row.get(3)?,
        is_last_forward: row.get(4)?,
        is_last_backward: row.get(5)?,
    })
}

fn row_to_timeline_event(row: &Row<'_>) -> rusqlite::Result<TimelineEvent> {
    Ok(TimelineEvent {
        chunk_id: row.get(0)?,
        display_index: row.get(1)?,
        state_index: row.get(2)?,
        event: row_to_event(row, 3)?,
    })
}

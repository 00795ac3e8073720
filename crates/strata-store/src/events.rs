use rusqlite::{params, OptionalExtension, Row};

use strata_shared::{
    DecryptionError, DecryptionErrorKind, DecryptionResult, Event, EventId, RoomId, UserId,
};

use crate::database::Tables;
use crate::error::{conversion_error, Result};

/// Column list matching [`row_to_event`], for tables aliased as `e`.
pub(crate) const EVENT_COLUMNS: &str = "e.event_id, e.room_id, e.type, e.sender, \
     e.origin_server_ts, e.state_key, e.content, e.unsigned, e.redacts, \
     e.decryption_result, e.decryption_error";

impl Tables<'_> {
    /// Insert an event or refresh a known one.
    ///
    /// A stored decryption result is never replaced by a missing one, and a
    /// decryption error is dropped as soon as a result exists.
    pub fn upsert_event(&self, event: &Event) -> Result<()> {
        let unsigned = serde_json::to_string(&event.unsigned)?;
        let result = event
            .decryption
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error = event
            .decryption_error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let waiting_session = waiting_session_id(event.decryption_error.as_ref());

        self.conn.execute(
            "INSERT INTO events (event_id, room_id, type, sender, origin_server_ts, state_key,
                                 content, unsigned, redacts, decryption_result,
                                 decryption_error, decryption_session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(event_id) DO UPDATE SET
                 content = excluded.content,
                 unsigned = excluded.unsigned,
                 decryption_result = COALESCE(excluded.decryption_result, events.decryption_result),
                 decryption_error = CASE
                     WHEN COALESCE(excluded.decryption_result, events.decryption_result) IS NOT NULL
                         THEN NULL
                     ELSE COALESCE(excluded.decryption_error, events.decryption_error) END,
                 decryption_session_id = CASE
                     WHEN COALESCE(excluded.decryption_result, events.decryption_result) IS NOT NULL
                         THEN NULL
                     ELSE COALESCE(excluded.decryption_session_id, events.decryption_session_id) END",
            params![
                event.event_id.as_str(),
                event.room_id.as_str(),
                event.event_type,
                event.sender.as_str(),
                event.origin_server_ts,
                event.state_key,
                event.content.to_string(),
                unsigned,
                event.redacts.as_ref().map(EventId::as_str),
                result,
                error,
                waiting_session,
            ],
        )?;
        Ok(())
    }

    pub fn get_event(&self, event_id: &EventId) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.event_id = ?1"),
                params![event_id.as_str()],
                |row| row_to_event(row, 0),
            )
            .optional()?;
        Ok(event)
    }

    pub fn event_exists(&self, event_id: &EventId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM events WHERE event_id = ?1",
                params![event_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Attach a successful decryption. Returns `false` for unknown events.
    pub fn record_decryption(&self, event_id: &EventId, result: &DecryptionResult) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE events
             SET decryption_result = ?2, decryption_error = NULL, decryption_session_id = NULL
             WHERE event_id = ?1",
            params![event_id.as_str(), serde_json::to_string(result)?],
        )?;
        Ok(affected > 0)
    }

    /// Attach a decryption failure unless the event already decrypted.
    /// Returns whether the failure was recorded.
    pub fn record_decryption_failure(
        &self,
        event_id: &EventId,
        error: &DecryptionError,
    ) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE events
             SET decryption_error = ?2, decryption_session_id = ?3
             WHERE event_id = ?1 AND decryption_result IS NULL",
            params![
                event_id.as_str(),
                serde_json::to_string(error)?,
                waiting_session_id(Some(error)),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Events of a room that failed to decrypt because `session_id` was not
    /// known yet.
    pub fn events_awaiting_session(&self, room_id: &RoomId, session_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE e.room_id = ?1 AND e.decryption_session_id = ?2
               AND e.decryption_result IS NULL
             ORDER BY e.origin_server_ts"
        ))?;
        let rows = stmt.query_map(params![room_id.as_str(), session_id], |row| {
            row_to_event(row, 0)
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Delete events of a room that no chunk or state slot refers to.
    pub fn prune_orphan_events(&self, room_id: &RoomId) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM events
             WHERE room_id = ?1
               AND event_id NOT IN (SELECT event_id FROM chunk_events)
               AND event_id NOT IN (SELECT event_id FROM untimelined_state)
               AND event_id NOT IN (SELECT event_id FROM current_state)",
            params![room_id.as_str()],
        )?;
        if removed > 0 {
            tracing::debug!(room_id = %room_id, removed, "pruned orphaned events");
        }
        Ok(removed)
    }
}

fn waiting_session_id(error: Option<&DecryptionError>) -> Option<&str> {
    error
        .filter(|e| e.kind == DecryptionErrorKind::UnknownInboundSession)
        .and_then(|e| e.session_id.as_deref())
}

/// Decode an event whose columns start at `offset` in [`EVENT_COLUMNS`] order.
pub(crate) fn row_to_event(row: &Row<'_>, offset: usize) -> rusqlite::Result<Event> {
    let col = |i: usize| offset + i;

    let event_id: String = row.get(col(0))?;
    let room_id: String = row.get(col(1))?;
    let sender: String = row.get(col(3))?;
    let content: String = row.get(col(6))?;
    let unsigned: Option<String> = row.get(col(7))?;
    let redacts: Option<String> = row.get(col(8))?;
    let result: Option<String> = row.get(col(9))?;
    let error: Option<String> = row.get(col(10))?;

    Ok(Event {
        event_id: EventId::parse(event_id).map_err(|e| conversion_error(col(0), e))?,
        room_id: RoomId::parse(room_id).map_err(|e| conversion_error(col(1), e))?,
        event_type: row.get(col(2))?,
        sender: UserId::parse(sender).map_err(|e| conversion_error(col(3), e))?,
        origin_server_ts: row.get(col(4))?,
        state_key: row.get(col(5))?,
        content: serde_json::from_str(&content).map_err(|e| conversion_error(col(6), e))?,
        unsigned: match unsigned {
            Some(u) => serde_json::from_str(&u).map_err(|e| conversion_error(col(7), e))?,
            None => Default::default(),
        },
        redacts: redacts
            .map(EventId::parse)
            .transpose()
            .map_err(|e| conversion_error(col(8), e))?,
        decryption: result
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| conversion_error(col(9), e))?,
        decryption_error: error
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| conversion_error(col(10), e))?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{event, room};
    use crate::Database;

    fn decrypted() -> DecryptionResult {
        DecryptionResult {
            clear_event: json!({ "type": "m.room.message", "content": { "body": "hello" } }),
            sender_curve25519_key: "curve".into(),
            claimed_ed25519_key: Some("ed".into()),
            forwarding_curve25519_key_chain: vec![],
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let e = event("$a", "m.room.message", None);
        db.tables().upsert_event(&e).unwrap();
        db.tables().upsert_event(&e).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.tables().get_event(&e.event_id).unwrap(), Some(e));
    }

    #[test]
    fn failure_never_overwrites_success() {
        let db = Database::open_in_memory().unwrap();
        let e = event("$enc", "m.room.encrypted", None);
        db.tables().upsert_event(&e).unwrap();
        assert!(db.tables().record_decryption(&e.event_id, &decrypted()).unwrap());

        let failure = DecryptionError::new(DecryptionErrorKind::Other, "session purged");
        assert!(!db
            .tables()
            .record_decryption_failure(&e.event_id, &failure)
            .unwrap());

        // a redelivery without a result keeps the stored one
        db.tables().upsert_event(&e).unwrap();

        let stored = db.tables().get_event(&e.event_id).unwrap().unwrap();
        assert_eq!(stored.decryption, Some(decrypted()));
        assert_eq!(stored.decryption_error, None);
        assert_eq!(stored.clear_content()["body"], "hello");
    }

    #[test]
    fn awaiting_session_lookup() {
        let db = Database::open_in_memory().unwrap();
        let e = event("$enc", "m.room.encrypted", None);
        db.tables().upsert_event(&e).unwrap();

        let failure = DecryptionError::new(DecryptionErrorKind::UnknownInboundSession, "no session")
            .with_session("sess1");
        assert!(db
            .tables()
            .record_decryption_failure(&e.event_id, &failure)
            .unwrap());

        let waiting = db.tables().events_awaiting_session(&room(), "sess1").unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].decryption_error, Some(failure));

        db.tables().record_decryption(&e.event_id, &decrypted()).unwrap();
        assert!(db
            .tables()
            .events_awaiting_session(&room(), "sess1")
            .unwrap()
            .is_empty());
    }
}

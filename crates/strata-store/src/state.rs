//! Room state: untimelined state slots, current state and the state in
//! effect at a given timeline event.
//!
//! State at an event is resolved by applying, in order, every untimelined
//! slot (ascending index) and then the chunk's state events whose
//! `state_index` does not exceed the event's, in display order.

use std::collections::BTreeMap;

use rusqlite::params;

use strata_shared::{Event, EventId, RoomId};

use crate::database::Tables;
use crate::error::{Result, StoreError};
use crate::events::{row_to_event, EVENT_COLUMNS};

/// `(type, state_key) -> event`
pub type StateMap = BTreeMap<(String, String), Event>;

impl Tables<'_> {
    /// Record a state event delivered outside the timeline. The slot gets an
    /// index below every untimelined index seen so far for the room.
    pub fn insert_untimelined_state(&self, event: &Event) -> Result<i64> {
        let Some(state_key) = event.state_key.as_deref() else {
            return Ok(0);
        };
        let min: Option<i64> = self.conn.query_row(
            "SELECT MIN(state_index) FROM untimelined_state WHERE room_id = ?1",
            params![event.room_id.as_str()],
            |row| row.get(0),
        )?;
        let index = min.unwrap_or(0).min(0) - 1;

        self.conn.execute(
            "INSERT INTO untimelined_state (room_id, type, state_key, event_id, state_index)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(room_id, type, state_key) DO UPDATE SET
                 event_id = excluded.event_id,
                 state_index = excluded.state_index",
            params![
                event.room_id.as_str(),
                event.event_type,
                state_key,
                event.event_id.as_str(),
                index
            ],
        )?;
        Ok(index)
    }

    /// Fill an untimelined slot only when it is still empty. Used for state
    /// older than what the slot already holds. Returns the index when a row
    /// was written.
    pub fn insert_untimelined_state_if_absent(&self, event: &Event) -> Result<Option<i64>> {
        let Some(state_key) = event.state_key.as_deref() else {
            return Ok(None);
        };
        let min: Option<i64> = self.conn.query_row(
            "SELECT MIN(state_index) FROM untimelined_state WHERE room_id = ?1",
            params![event.room_id.as_str()],
            |row| row.get(0),
        )?;
        let index = min.unwrap_or(0).min(0) - 1;

        let written = self.conn.execute(
            "INSERT INTO untimelined_state (room_id, type, state_key, event_id, state_index)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(room_id, type, state_key) DO NOTHING",
            params![
                event.room_id.as_str(),
                event.event_type,
                state_key,
                event.event_id.as_str(),
                index
            ],
        )?;
        Ok((written > 0).then_some(index))
    }

    pub fn untimelined_state(&self, room_id: &RoomId) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM untimelined_state us
             JOIN events e ON e.event_id = us.event_id
             WHERE us.room_id = ?1
             ORDER BY us.state_index"
        ))?;
        let rows = stmt.query_map(params![room_id.as_str()], |row| row_to_event(row, 0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn clear_untimelined_state(&self, room_id: &RoomId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM untimelined_state WHERE room_id = ?1",
            params![room_id.as_str()],
        )?)
    }

    /// Make `event` the current value of its state slot.
    pub fn set_current_state(&self, event: &Event) -> Result<()> {
        let Some(state_key) = event.state_key.as_deref() else {
            return Ok(());
        };
        self.conn.execute(
            "INSERT INTO current_state (room_id, type, state_key, event_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(room_id, type, state_key) DO UPDATE SET event_id = excluded.event_id",
            params![
                event.room_id.as_str(),
                event.event_type,
                state_key,
                event.event_id.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn current_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<Event>> {
        let mut events = self.query_current_state(
            "cs.room_id = ?1 AND cs.type = ?2 AND cs.state_key = ?3",
            params![room_id.as_str(), event_type, state_key],
        )?;
        Ok(events.pop())
    }

    pub fn current_state_of_type(&self, room_id: &RoomId, event_type: &str) -> Result<Vec<Event>> {
        self.query_current_state(
            "cs.room_id = ?1 AND cs.type = ?2",
            params![room_id.as_str(), event_type],
        )
    }

    pub fn current_state(&self, room_id: &RoomId) -> Result<Vec<Event>> {
        self.query_current_state("cs.room_id = ?1", params![room_id.as_str()])
    }

    pub fn clear_current_state(&self, room_id: &RoomId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM current_state WHERE room_id = ?1",
            params![room_id.as_str()],
        )?)
    }

    fn query_current_state(&self, filter: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM current_state cs
             JOIN events e ON e.event_id = cs.event_id
             WHERE {filter}
             ORDER BY cs.type, cs.state_key"
        ))?;
        let rows = stmt.query_map(params, |row| row_to_event(row, 0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Room state in effect at a timeline event, including the event itself
    /// when it is a state event.
    pub fn state_at_event(&self, room_id: &RoomId, event_id: &EventId) -> Result<StateMap> {
        let position = self
            .timeline_position(room_id, event_id)?
            .ok_or(StoreError::NotFound)?;

        let mut state = StateMap::new();
        for event in self.untimelined_state(room_id)? {
            apply(&mut state, event);
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM chunk_events ce
             JOIN events e ON e.event_id = ce.event_id
             WHERE ce.chunk_id = ?1 AND ce.state_index <= ?2 AND e.state_key IS NOT NULL
             ORDER BY ce.display_index"
        ))?;
        let rows = stmt
            .query_map(params![position.chunk_id, position.state_index], |row| {
                row_to_event(row, 0)
            })?;
        for row in rows {
            apply(&mut state, row?);
        }
        Ok(state)
    }
}

fn apply(state: &mut StateMap, event: Event) {
    if let Some(state_key) = event.state_key.clone() {
        state.insert((event.event_type.clone(), state_key), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{event, room};
    use crate::Database;

    #[test]
    fn untimelined_indices_decrease() {
        let db = Database::open_in_memory().unwrap();
        let t = db.tables();

        let a = event("$a", "m.room.create", Some(""));
        let b = event("$b", "m.room.name", Some(""));
        t.upsert_event(&a).unwrap();
        t.upsert_event(&b).unwrap();

        assert_eq!(t.insert_untimelined_state(&a).unwrap(), -1);
        assert_eq!(t.insert_untimelined_state(&b).unwrap(), -2);

        // replacing a slot keeps one row per slot
        let b2 = event("$b2", "m.room.name", Some(""));
        t.upsert_event(&b2).unwrap();
        assert_eq!(t.insert_untimelined_state(&b2).unwrap(), -3);

        let ids: Vec<_> = t
            .untimelined_state(&room())
            .unwrap()
            .into_iter()
            .map(|e| e.event_id.to_string())
            .collect();
        assert_eq!(ids, vec!["$b2", "$a"]);
    }

    #[test]
    fn older_state_never_replaces_a_filled_slot() {
        let db = Database::open_in_memory().unwrap();
        let t = db.tables();

        let newer = event("$member_new", "m.room.member", Some("@bob:example.org"));
        let older = event("$member_old", "m.room.member", Some("@bob:example.org"));
        let name = event("$name", "m.room.name", Some(""));
        for e in [&newer, &older, &name] {
            t.upsert_event(e).unwrap();
        }

        t.insert_untimelined_state(&newer).unwrap();
        assert_eq!(t.insert_untimelined_state_if_absent(&older).unwrap(), None);
        assert_eq!(t.insert_untimelined_state_if_absent(&name).unwrap(), Some(-2));

        let ids: Vec<_> = t
            .untimelined_state(&room())
            .unwrap()
            .into_iter()
            .map(|e| e.event_id.to_string())
            .collect();
        assert_eq!(ids, vec!["$name", "$member_new"]);
    }

    #[test]
    fn current_state_replaces_slot() {
        let db = Database::open_in_memory().unwrap();
        let t = db.tables();
        let first = event("$n1", "m.room.name", Some(""));
        let second = event("$n2", "m.room.name", Some(""));
        t.upsert_event(&first).unwrap();
        t.upsert_event(&second).unwrap();

        t.set_current_state(&first).unwrap();
        t.set_current_state(&second).unwrap();

        let current = t.current_state_event(&room(), "m.room.name", "").unwrap().unwrap();
        assert_eq!(current.event_id.as_str(), "$n2");
        assert_eq!(t.current_state(&room()).unwrap().len(), 1);
    }

    #[test]
    fn state_at_event_excludes_later_state() {
        let db = Database::open_in_memory().unwrap();
        let t = db.tables();
        let chunk = t.create_chunk(&room(), None, None, true).unwrap();

        let create = event("$create", "m.room.create", Some(""));
        t.upsert_event(&create).unwrap();
        t.insert_untimelined_state(&create).unwrap();

        // forward appends: state events bump the index, messages reuse it
        let timeline = [
            (event("$m1", "m.room.message", None), 0),
            (event("$topic1", "m.room.topic", Some("")), 1),
            (event("$m2", "m.room.message", None), 1),
            (event("$topic2", "m.room.topic", Some("")), 2),
        ];
        for (e, idx) in &timeline {
            t.upsert_event(e).unwrap();
            t.append_to_chunk(chunk.chunk_id, &e.event_id, *idx).unwrap();
        }

        let at_m1 = t.state_at_event(&room(), &EventId::parse("$m1").unwrap()).unwrap();
        assert!(at_m1.contains_key(&("m.room.create".into(), "".into())));
        assert!(!at_m1.contains_key(&("m.room.topic".into(), "".into())));

        let at_m2 = t.state_at_event(&room(), &EventId::parse("$m2").unwrap()).unwrap();
        assert_eq!(
            at_m2[&("m.room.topic".to_string(), "".to_string())].event_id.as_str(),
            "$topic1"
        );

        let at_end = t.state_at_event(&room(), &EventId::parse("$topic2").unwrap()).unwrap();
        assert_eq!(
            at_end[&("m.room.topic".to_string(), "".to_string())].event_id.as_str(),
            "$topic2"
        );
    }
}

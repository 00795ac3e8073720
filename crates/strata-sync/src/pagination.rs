//! Backward pagination of a room's timeline.
//!
//! Older events are fetched from the oldest chunk's `prev_token` and
//! prepended to that chunk. When the returned `end` token is the forward
//! end of another cached chunk, the two are merged so the timeline stays
//! contiguous.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use strata_net::{MessagesRequest, Transport};
use strata_shared::constants::DEFAULT_PAGINATION_LIMIT;
use strata_shared::sync::{Direction, MessagesResponse};
use strata_shared::{Event, RoomId};
use strata_store::{ChunkRecord, SharedDatabase, Tables};

use crate::crypto_sync::CryptoSyncHandler;
use crate::error::{Result, SyncError};
use crate::locks::RoomLocks;
use crate::processors::{Processors, RoomEventsMode};
use crate::timeline::parse_events;

#[derive(Debug, Default)]
pub struct PaginationOutcome {
    /// Newly prepended events, oldest first.
    pub events: Vec<Event>,
    /// The start of the room's history is now cached.
    pub reached_start: bool,
}

pub struct Paginator {
    transport: Arc<dyn Transport>,
    db: SharedDatabase,
    crypto_sync: CryptoSyncHandler,
    locks: RoomLocks,
    processors: Processors,
}

impl Paginator {
    pub fn new(
        transport: Arc<dyn Transport>,
        db: SharedDatabase,
        crypto_sync: CryptoSyncHandler,
        locks: RoomLocks,
        processors: Processors,
    ) -> Self {
        Self {
            transport,
            db,
            crypto_sync,
            locks,
            processors,
        }
    }

    /// Fetch up to `limit` events older than anything cached for the room.
    /// A zero limit uses the default page size.
    pub async fn paginate_backwards(&self, room_id: &RoomId, limit: u32) -> Result<PaginationOutcome> {
        let limit = if limit == 0 { DEFAULT_PAGINATION_LIMIT } else { limit };
        let _guard = self.locks.lock(room_id).await;

        let chunk = {
            let db = strata_store::lock(&self.db);
            let tables = db.tables();
            if tables.membership(room_id)?.is_none() {
                return Err(SyncError::UnknownRoom(room_id.to_string()));
            }
            oldest_chunk(tables, room_id)?
        };

        let from = match (&chunk.prev_token, chunk.is_last_backward) {
            (Some(token), false) => token.clone(),
            _ => {
                debug!(room_id = %room_id, chunk_id = chunk.chunk_id, "start of history already cached");
                return Ok(PaginationOutcome {
                    events: Vec::new(),
                    reached_start: true,
                });
            }
        };

        let request = MessagesRequest {
            room_id: room_id.clone(),
            from: from.clone(),
            dir: Direction::Backward,
            limit,
        };
        let response = self.transport.room_messages(&request).await?;

        // Newest first, as the server returns them going backwards.
        let mut events = parse_events(&response.chunk, room_id);
        let state = parse_events(&response.state, room_id);
        let context_id = Uuid::new_v4().to_string();
        self.crypto_sync
            .decrypt_events(room_id, &mut events, &context_id)
            .await?;

        let outcome = {
            let mut db = strata_store::lock(&self.db);
            let txn = db.transaction()?;
            let outcome = prepend(txn.tables(), &chunk, &from, &events, &state, &response)?;
            txn.commit()?;
            outcome
        };

        info!(
            room_id = %room_id,
            chunk_id = chunk.chunk_id,
            received = events.len(),
            inserted = outcome.events.len(),
            reached_start = outcome.reached_start,
            "paginated backwards"
        );

        self.processors
            .notify(RoomEventsMode::Paginating, room_id, &outcome.events);
        Ok(outcome)
    }
}

/// Walk from the live chunk to the oldest chunk linked to it.
fn oldest_chunk(tables: Tables<'_>, room_id: &RoomId) -> Result<ChunkRecord> {
    let mut chunk = tables
        .live_chunk(room_id)?
        .ok_or_else(|| SyncError::NoTimeline(room_id.to_string()))?;

    let mut seen = HashSet::from([chunk.chunk_id]);
    while let Some(token) = chunk.prev_token.as_deref() {
        match tables.chunk_with_next_token(room_id, token)? {
            Some(previous) if seen.insert(previous.chunk_id) => chunk = previous,
            _ => break,
        }
    }
    Ok(chunk)
}

fn prepend(
    tables: Tables<'_>,
    chunk: &ChunkRecord,
    from: &str,
    events: &[Event],
    state: &[Event],
    response: &MessagesResponse,
) -> Result<PaginationOutcome> {
    // Paginated state is older than anything already recorded for a slot.
    for event in state {
        tables.upsert_event(event)?;
        tables.insert_untimelined_state_if_absent(event)?;
    }

    // Going backwards a state event keeps the index of the events after
    // it; the index drops once it has been passed.
    let mut state_index = tables
        .chunk_bounds(chunk.chunk_id)?
        .map(|b| b.min_state_index - 1)
        .unwrap_or(0);

    let mut inserted = Vec::new();
    for event in events {
        tables.upsert_event(event)?;
        if tables.chunk_contains(chunk.chunk_id, &event.event_id)? {
            continue;
        }
        tables.prepend_to_chunk(chunk.chunk_id, &event.event_id, state_index)?;
        if event.is_state() {
            state_index -= 1;
        }
        inserted.push(event.clone());
    }

    let exhausted = match response.end.as_deref() {
        None => true,
        Some(end) => events.is_empty() && end == from,
    };

    if exhausted {
        tables.set_chunk_prev_token(chunk.chunk_id, None)?;
    } else if let Some(end) = response.end.as_deref() {
        tables.set_chunk_prev_token(chunk.chunk_id, Some(end))?;
        if let Some(adjacent) = tables.chunk_with_next_token(&chunk.room_id, end)? {
            if adjacent.chunk_id != chunk.chunk_id {
                tables.merge_chunk_before(adjacent.chunk_id, chunk.chunk_id)?;
            }
        }
    }

    inserted.reverse();
    Ok(PaginationOutcome {
        events: inserted,
        reached_start: exhausted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ChannelProcessor;
    use crate::test_support::{FakeCrypto, FakeTransport};
    use crate::timeline::merge_events;
    use crate::verification::VerificationTracker;
    use serde_json::{json, Value};
    use strata_net::NetError;
    use strata_shared::{DeviceId, EventId, Membership, UserId};
    use strata_store::Database;

    fn room() -> RoomId {
        RoomId::parse("!r:example.org").unwrap()
    }

    fn raw(id: &str, event_type: &str, state_key: Option<&str>) -> Value {
        let mut raw = json!({
            "event_id": id,
            "type": event_type,
            "sender": "@alice:example.org",
            "origin_server_ts": 1_000,
            "content": { "body": id }
        });
        if let Some(key) = state_key {
            raw["state_key"] = json!(key);
        }
        raw
    }

    fn page(events: Vec<Value>, end: Option<&str>) -> MessagesResponse {
        MessagesResponse {
            start: "start".into(),
            end: end.map(str::to_string),
            chunk: events,
            state: Vec::new(),
        }
    }

    struct Fixture {
        db: SharedDatabase,
        transport: Arc<FakeTransport>,
        paginator: Paginator,
        updates: tokio::sync::mpsc::UnboundedReceiver<crate::processors::RoomEventsUpdate>,
    }

    fn fixture(live: &[Value], prev_batch: Option<&str>) -> Fixture {
        let db = Database::open_in_memory().unwrap().into_shared();
        {
            let guard = strata_store::lock(&db);
            let tables = guard.tables();
            tables.set_membership(&room(), Membership::Joined).unwrap();
            let events = parse_events(live, &room());
            merge_events(tables, &room(), &events, prev_batch, false, true).unwrap();
        }

        let transport = Arc::new(FakeTransport::default());
        let crypto_sync = CryptoSyncHandler::new(
            Arc::new(FakeCrypto::default()),
            db.clone(),
            Arc::new(VerificationTracker::new(
                UserId::parse("@me:example.org").unwrap(),
                DeviceId::parse("PHONE").unwrap(),
            )),
        );
        let mut processors = Processors::new();
        let (channel, updates) = ChannelProcessor::new();
        processors.register(Arc::new(channel));

        let paginator = Paginator::new(
            transport.clone(),
            db.clone(),
            crypto_sync,
            RoomLocks::new(),
            processors,
        );
        Fixture {
            db,
            transport,
            paginator,
            updates,
        }
    }

    fn chunk_ids(db: &SharedDatabase) -> Vec<String> {
        let guard = strata_store::lock(db);
        let tables = guard.tables();
        let live = tables.live_chunk(&room()).unwrap().unwrap();
        tables
            .chunk_events(live.chunk_id)
            .unwrap()
            .into_iter()
            .map(|e| e.event.event_id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_prepends_older_events_in_order() {
        let mut f = fixture(&[raw("$c", "m.room.message", None)], Some("t1"));
        f.transport.push_messages(Ok(page(
            vec![raw("$b", "m.room.message", None), raw("$a", "m.room.message", None)],
            Some("t0"),
        )));

        let outcome = f.paginator.paginate_backwards(&room(), 10).await.unwrap();
        assert!(!outcome.reached_start);
        assert_eq!(outcome.events[0].event_id.as_str(), "$a");
        assert_eq!(chunk_ids(&f.db), vec!["$a", "$b", "$c"]);

        let request = &f.transport.message_requests()[0];
        assert_eq!(request.from, "t1");
        assert_eq!(request.dir, Direction::Backward);
        assert_eq!(request.limit, 10);

        let live = strata_store::lock(&f.db).tables().live_chunk(&room()).unwrap().unwrap();
        assert_eq!(live.prev_token.as_deref(), Some("t0"));

        let update = f.updates.try_recv().unwrap();
        assert_eq!(update.mode, RoomEventsMode::Paginating);
        assert_eq!(update.events.len(), 2);
    }

    #[tokio::test]
    async fn test_state_indices_going_backwards() {
        let f = fixture(&[raw("$msg", "m.room.message", None)], Some("t1"));
        f.transport.push_messages(Ok(page(
            vec![
                raw("$topic", "m.room.topic", Some("")),
                raw("$old", "m.room.message", None),
                raw("$create", "m.room.create", Some("")),
            ],
            None,
        )));

        let outcome = f.paginator.paginate_backwards(&room(), 10).await.unwrap();
        assert!(outcome.reached_start);

        let guard = strata_store::lock(&f.db);
        let tables = guard.tables();
        let at_msg = tables
            .state_at_event(&room(), &EventId::parse("$msg").unwrap())
            .unwrap();
        assert!(at_msg.contains_key(&("m.room.topic".to_string(), String::new())));
        assert!(at_msg.contains_key(&("m.room.create".to_string(), String::new())));

        let at_old = tables
            .state_at_event(&room(), &EventId::parse("$old").unwrap())
            .unwrap();
        assert!(at_old.contains_key(&("m.room.create".to_string(), String::new())));
        assert!(!at_old.contains_key(&("m.room.topic".to_string(), String::new())));
    }

    #[tokio::test]
    async fn test_paginated_state_keeps_newer_synced_state() {
        let f = fixture(&[raw("$msg", "m.room.message", None)], Some("t1"));
        {
            let guard = strata_store::lock(&f.db);
            let tables = guard.tables();
            let newer = Event::from_raw(
                &raw("$member_new", "m.room.member", Some("@bob:example.org")),
                &room(),
            )
            .unwrap();
            tables.upsert_event(&newer).unwrap();
            tables.insert_untimelined_state(&newer).unwrap();
        }

        let mut response = page(vec![raw("$old", "m.room.message", None)], Some("t0"));
        response.state = vec![raw("$member_old", "m.room.member", Some("@bob:example.org"))];
        f.transport.push_messages(Ok(response));
        f.paginator.paginate_backwards(&room(), 10).await.unwrap();

        let guard = strata_store::lock(&f.db);
        let at_msg = guard
            .tables()
            .state_at_event(&room(), &EventId::parse("$msg").unwrap())
            .unwrap();
        let member = &at_msg[&("m.room.member".to_string(), "@bob:example.org".to_string())];
        assert_eq!(member.event_id.as_str(), "$member_new");
    }

    #[tokio::test]
    async fn test_start_of_history_is_remembered() {
        let f = fixture(&[raw("$c", "m.room.message", None)], Some("t1"));
        f.transport.push_messages(Ok(page(Vec::new(), Some("t1"))));

        let first = f.paginator.paginate_backwards(&room(), 10).await.unwrap();
        assert!(first.reached_start);

        let second = f.paginator.paginate_backwards(&room(), 10).await.unwrap();
        assert!(second.reached_start);
        assert_eq!(f.transport.message_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_adjacent_chunk_is_merged() {
        let f = fixture(&[raw("$new", "m.room.message", None)], Some("t2"));
        {
            let guard = strata_store::lock(&f.db);
            let tables = guard.tables();
            let older = tables
                .create_chunk(&room(), Some("t0"), Some("t1"), false)
                .unwrap();
            let event = Event::from_raw(&raw("$oldest", "m.room.message", None), &room()).unwrap();
            tables.upsert_event(&event).unwrap();
            tables.append_to_chunk(older.chunk_id, &event.event_id, 0).unwrap();
        }
        f.transport.push_messages(Ok(page(vec![raw("$mid", "m.room.message", None)], Some("t1"))));

        f.paginator.paginate_backwards(&room(), 10).await.unwrap();
        assert_eq!(chunk_ids(&f.db), vec!["$oldest", "$mid", "$new"]);

        let guard = strata_store::lock(&f.db);
        let tables = guard.tables();
        assert_eq!(tables.chunks_for_room(&room()).unwrap().len(), 1);
        let live = tables.live_chunk(&room()).unwrap().unwrap();
        assert_eq!(live.prev_token.as_deref(), Some("t0"));
    }

    #[tokio::test]
    async fn test_unknown_room_and_missing_timeline() {
        let f = fixture(&[], None);
        let other = RoomId::parse("!other:example.org").unwrap();
        assert!(matches!(
            f.paginator.paginate_backwards(&other, 10).await,
            Err(SyncError::UnknownRoom(_))
        ));

        strata_store::lock(&f.db).tables().delete_room_chunks(&room()).unwrap();
        assert!(matches!(
            f.paginator.paginate_backwards(&room(), 10).await,
            Err(SyncError::NoTimeline(_))
        ));
    }

    #[tokio::test]
    async fn test_network_error_leaves_chunk_untouched() {
        let f = fixture(&[raw("$c", "m.room.message", None)], Some("t1"));
        f.transport
            .push_messages(Err(NetError::Network("connection reset".into())));

        let err = f.paginator.paginate_backwards(&room(), 10).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(chunk_ids(&f.db), vec!["$c"]);
        let live = strata_store::lock(&f.db).tables().live_chunk(&room()).unwrap().unwrap();
        assert_eq!(live.prev_token.as_deref(), Some("t1"));
    }
}

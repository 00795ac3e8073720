//! Timeline merge engine.
//!
//! A sync batch either extends the room's live chunk or replaces it:
//!
//! - initial sync: every cached chunk of the room is discarded and a fresh
//!   live chunk is allocated;
//! - incremental, not limited: events are appended to the live chunk;
//! - incremental, limited: the live chunk is deleted (it no longer connects
//!   to the new events) and a new one starts at `prev_batch`.
//!
//! State events appended going forward take the chunk's last state index
//! plus one; other events share the last index. The index is read once per
//! batch.

use serde_json::Value;
use tracing::{debug, info, warn};

use strata_shared::{Event, RoomId};
use strata_store::{ChunkRecord, Tables};

use crate::error::Result;

/// What a merge changed.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The live chunk after the merge.
    pub chunk: ChunkRecord,
    /// Events newly placed in the chunk, oldest first.
    pub inserted: Vec<Event>,
    /// Transaction ids of the local echoes replaced by synced events.
    pub replaced_echoes: Vec<String>,
    /// Whether earlier chunks were dropped, leaving events to prune.
    pub discarded_history: bool,
}

/// Normalise a batch of raw events. Malformed events are logged and left
/// out; the rest of the batch is kept.
pub fn parse_events(raw: &[Value], room_id: &RoomId) -> Vec<Event> {
    raw.iter()
        .filter_map(|value| match Event::from_raw(value, room_id) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "skipping malformed event");
                None
            }
        })
        .collect()
}

/// Merge one batch of timeline events into the room's live chunk.
pub fn merge_events(
    tables: Tables<'_>,
    room_id: &RoomId,
    events: &[Event],
    prev_token: Option<&str>,
    is_limited: bool,
    is_initial_sync: bool,
) -> Result<MergeOutcome> {
    let (chunk, discarded_history) =
        chunk_for_batch(tables, room_id, prev_token, is_limited, is_initial_sync)?;

    let mut state_index = tables
        .chunk_bounds(chunk.chunk_id)?
        .map(|b| b.max_state_index)
        .unwrap_or(0);

    let mut inserted = Vec::new();
    let mut replaced_echoes = Vec::new();

    for event in events {
        // Echo removal runs whether or not the event is new: a retried send
        // can surface after the event was already merged.
        if let Some(txn_id) = event.transaction_id() {
            if tables.remove_local_echo(room_id, txn_id)? {
                debug!(room_id = %room_id, txn_id, event_id = %event.event_id, "local echo replaced");
                replaced_echoes.push(txn_id.to_string());
            }
        }

        tables.upsert_event(event)?;
        if tables.chunk_contains(chunk.chunk_id, &event.event_id)? {
            continue;
        }

        if event.is_state() {
            state_index += 1;
            tables.set_current_state(event)?;
        }
        tables.append_to_chunk(chunk.chunk_id, &event.event_id, state_index)?;
        inserted.push(event.clone());
    }

    debug!(
        room_id = %room_id,
        chunk_id = chunk.chunk_id,
        received = events.len(),
        inserted = inserted.len(),
        "merged timeline batch"
    );

    Ok(MergeOutcome {
        chunk,
        inserted,
        replaced_echoes,
        discarded_history,
    })
}

fn chunk_for_batch(
    tables: Tables<'_>,
    room_id: &RoomId,
    prev_token: Option<&str>,
    is_limited: bool,
    is_initial_sync: bool,
) -> Result<(ChunkRecord, bool)> {
    if is_initial_sync {
        let removed = tables.delete_room_chunks(room_id)?;
        if removed > 0 {
            debug!(room_id = %room_id, removed, "initial sync discards cached chunks");
        }
        let chunk = tables.create_chunk(room_id, prev_token, None, true)?;
        return Ok((chunk, removed > 0));
    }

    match tables.live_chunk(room_id)? {
        Some(live) if !is_limited => Ok((live, false)),
        Some(live) => {
            info!(room_id = %room_id, chunk_id = live.chunk_id, "limited timeline, replacing live chunk");
            tables.delete_chunk(live.chunk_id)?;
            let chunk = tables.create_chunk(room_id, prev_token, None, true)?;
            Ok((chunk, true))
        }
        None => Ok((tables.create_chunk(room_id, prev_token, None, true)?, false)),
    }
}

//! Read receipts and typing notifications. Neither touches the timeline.

use serde_json::Value;
use tracing::{debug, warn};

use strata_shared::constants::{EVENT_RECEIPT, EVENT_TYPING};
use strata_shared::{EventId, RoomId, UserId};
use strata_store::{ReadReceipt, Tables};

use crate::error::Result;

pub fn apply_ephemeral(tables: Tables<'_>, room_id: &RoomId, events: &[Value]) -> Result<()> {
    for event in events {
        let content = event.get("content").unwrap_or(&Value::Null);
        match event.get("type").and_then(Value::as_str) {
            Some(EVENT_RECEIPT) => apply_receipts(tables, room_id, content)?,
            Some(EVENT_TYPING) => {
                let users: Vec<String> = content
                    .get("user_ids")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                tables.set_typing_users(room_id, &users)?;
            }
            Some(other) => debug!(room_id = %room_id, event_type = other, "ignoring ephemeral event"),
            None => warn!(room_id = %room_id, "ephemeral event without a type"),
        }
    }
    Ok(())
}

/// `{ "$event": { "m.read": { "@user:server": { "ts": 1 } } } }`
fn apply_receipts(tables: Tables<'_>, room_id: &RoomId, content: &Value) -> Result<()> {
    let Some(by_event) = content.as_object() else {
        return Ok(());
    };
    for (event_id, by_type) in by_event {
        let Ok(event_id) = EventId::parse(event_id.as_str()) else {
            warn!(room_id = %room_id, event_id = %event_id, "receipt for malformed event id");
            continue;
        };
        let Some(by_type) = by_type.as_object() else {
            continue;
        };
        for (receipt_type, by_user) in by_type {
            let Some(by_user) = by_user.as_object() else {
                continue;
            };
            for (user_id, data) in by_user {
                let Ok(user_id) = UserId::parse(user_id.as_str()) else {
                    continue;
                };
                tables.upsert_read_receipt(&ReadReceipt {
                    room_id: room_id.clone(),
                    user_id,
                    receipt_type: receipt_type.clone(),
                    event_id: event_id.clone(),
                    ts: data.get("ts").and_then(Value::as_i64),
                })?;
            }
        }
    }
    Ok(())
}

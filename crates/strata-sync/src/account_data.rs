//! Room and global account data.

use serde_json::Value;
use tracing::{debug, warn};

use strata_shared::constants::{EVENT_DIRECT, EVENT_FULLY_READ, EVENT_IGNORED_USER_LIST, EVENT_TAG};
use strata_shared::{RoomId, UserId};
use strata_store::{RoomTag, Tables};

use crate::error::Result;

fn type_and_content(event: &Value) -> Option<(&str, &Value)> {
    let event_type = event.get("type").and_then(Value::as_str)?;
    let content = event.get("content").filter(|c| c.is_object())?;
    Some((event_type, content))
}

pub fn apply_room_account_data(tables: Tables<'_>, room_id: &RoomId, events: &[Value]) -> Result<()> {
    for event in events {
        let Some((event_type, content)) = type_and_content(event) else {
            warn!(room_id = %room_id, "skipping malformed room account data");
            continue;
        };
        tables.save_account_data(Some(room_id), event_type, content)?;

        match event_type {
            EVENT_TAG => {
                let tags = parse_tags(content);
                debug!(room_id = %room_id, count = tags.len(), "room tags replaced");
                tables.replace_room_tags(room_id, &tags)?;
            }
            EVENT_FULLY_READ => {
                if let Some(event_id) = content.get("event_id").and_then(Value::as_str) {
                    tables.set_fully_read(room_id, event_id)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Apply global account data. Runs after the rooms of the same payload so
/// that `m.direct` can flag rooms created by it.
pub fn apply_global_account_data(tables: Tables<'_>, events: &[Value]) -> Result<()> {
    for event in events {
        let Some((event_type, content)) = type_and_content(event) else {
            warn!("skipping malformed account data");
            continue;
        };
        tables.save_account_data(None, event_type, content)?;

        if event_type == EVENT_DIRECT {
            let rooms = direct_rooms(content);
            debug!(count = rooms.len(), "direct rooms updated");
            tables.set_direct_rooms(&rooms)?;
        }
    }
    Ok(())
}

/// Users whose events the account owner chose to ignore.
pub fn ignored_users(tables: Tables<'_>) -> Result<Vec<UserId>> {
    let Some(content) = tables.account_data(None, EVENT_IGNORED_USER_LIST)? else {
        return Ok(Vec::new());
    };
    Ok(content
        .get("ignored_users")
        .and_then(Value::as_object)
        .map(|users| {
            users
                .keys()
                .filter_map(|u| UserId::parse(u.as_str()).ok())
                .collect()
        })
        .unwrap_or_default())
}

/// `{ "tags": { "m.favourite": { "order": 0.5 } } }`
fn parse_tags(content: &Value) -> Vec<RoomTag> {
    content
        .get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .map(|(tag, info)| RoomTag {
                    tag: tag.clone(),
                    order: info.get("order").and_then(Value::as_f64),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `{ "@user:server": ["!room:server", ...] }`
fn direct_rooms(content: &Value) -> Vec<RoomId> {
    let mut rooms: Vec<RoomId> = content
        .as_object()
        .into_iter()
        .flat_map(|by_user| by_user.values())
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(|r| RoomId::parse(r).ok())
        .collect();
    rooms.sort();
    rooms.dedup();
    rooms
}

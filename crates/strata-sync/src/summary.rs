//! Room summary recomputation.

use serde_json::Value;

use strata_shared::constants::{
    EVENT_ROOM_AVATAR, EVENT_ROOM_CANONICAL_ALIAS, EVENT_ROOM_CREATE, EVENT_ROOM_ENCRYPTION,
    EVENT_ROOM_MEMBER, EVENT_ROOM_NAME, EVENT_ROOM_TOPIC,
};
use strata_shared::sync::{RoomSummaryPayload, UnreadNotifications};
use strata_shared::{Event, Membership, RoomId, UserId};
use strata_store::{RoomSummary, Tables};

use crate::error::Result;

/// Heroes picked locally when the server does not send any.
const MAX_HEROES: usize = 5;

pub const EMPTY_ROOM_NAME: &str = "Empty room";

/// Inputs of one recomputation besides the stored state.
#[derive(Debug, Clone, Copy)]
pub struct SummaryUpdate<'a> {
    pub membership: Membership,
    pub payload: Option<&'a RoomSummaryPayload>,
    pub unread: Option<&'a UnreadNotifications>,
    /// Recompute member-derived fields from current state. Skipped when the
    /// batch carried no member event.
    pub members_changed: bool,
}

impl SummaryUpdate<'_> {
    pub fn new(membership: Membership) -> Self {
        Self {
            membership,
            payload: None,
            unread: None,
            members_changed: false,
        }
    }
}

pub fn update_summary(
    tables: Tables<'_>,
    room_id: &RoomId,
    own_user: &UserId,
    update: SummaryUpdate<'_>,
) -> Result<RoomSummary> {
    let mut summary = tables
        .room_summary(room_id)?
        .unwrap_or_else(|| RoomSummary::new(room_id.clone(), update.membership));
    summary.membership = update.membership;

    summary.name = state_string(tables, room_id, EVENT_ROOM_NAME, "name")?;
    summary.topic = state_string(tables, room_id, EVENT_ROOM_TOPIC, "topic")?;
    summary.avatar_url = state_string(tables, room_id, EVENT_ROOM_AVATAR, "url")?;
    summary.canonical_alias = state_string(tables, room_id, EVENT_ROOM_CANONICAL_ALIAS, "alias")?;
    summary.room_type = state_string(tables, room_id, EVENT_ROOM_CREATE, "type")?;
    summary.is_encrypted = tables
        .current_state_event(room_id, EVENT_ROOM_ENCRYPTION, "")?
        .is_some();

    if update.members_changed {
        let members = tables.current_state_of_type(room_id, EVENT_ROOM_MEMBER)?;
        let joined = members_with(&members, "join");
        let invited = members_with(&members, "invite");
        summary.joined_member_count = joined.len() as u64;
        summary.invited_member_count = invited.len() as u64;

        let mut heroes: Vec<String> = joined
            .iter()
            .chain(invited.iter())
            .filter(|user| **user != own_user.as_str())
            .map(|user| user.to_string())
            .collect();
        heroes.sort();
        heroes.truncate(MAX_HEROES);
        summary.heroes = heroes;
    }

    if let Some(payload) = update.payload {
        if let Some(heroes) = &payload.heroes {
            summary.heroes = heroes.clone();
        }
        if let Some(count) = payload.joined_member_count {
            summary.joined_member_count = count;
        }
        if let Some(count) = payload.invited_member_count {
            summary.invited_member_count = count;
        }
    }

    if let Some(unread) = update.unread {
        if let Some(count) = unread.highlight_count {
            summary.highlight_count = count;
        }
        if let Some(count) = unread.notification_count {
            summary.notification_count = count;
        }
    }

    summary.latest_event_id = match tables.live_chunk(room_id)? {
        Some(chunk) => tables
            .last_chunk_event(chunk.chunk_id)?
            .map(|e| e.event.event_id),
        None => None,
    };

    summary.display_name = display_name(tables, &summary, own_user)?;
    tables.save_room_summary(&summary)?;
    Ok(summary)
}

fn state_string(
    tables: Tables<'_>,
    room_id: &RoomId,
    event_type: &str,
    field: &str,
) -> Result<Option<String>> {
    Ok(tables
        .current_state_event(room_id, event_type, "")?
        .and_then(|e| e.content.get(field).and_then(Value::as_str).map(str::to_string))
        .filter(|s| !s.is_empty()))
}

fn membership_of(event: &Event) -> Option<&str> {
    event.content.get("membership").and_then(Value::as_str)
}

fn members_with<'e>(members: &'e [Event], membership: &str) -> Vec<&'e str> {
    members
        .iter()
        .filter(|e| membership_of(e) == Some(membership))
        .filter_map(|e| e.state_key.as_deref())
        .collect()
}

/// Name shown for a member: their display name in this room, else their id.
fn member_name(tables: Tables<'_>, room_id: &RoomId, user_id: &str) -> Result<String> {
    Ok(tables
        .current_state_event(room_id, EVENT_ROOM_MEMBER, user_id)?
        .and_then(|e| {
            e.content
                .get("displayname")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| user_id.to_string()))
}

/// m.room.name, then the canonical alias, then the heroes, then
/// [`EMPTY_ROOM_NAME`].
fn display_name(tables: Tables<'_>, summary: &RoomSummary, own_user: &UserId) -> Result<String> {
    if let Some(name) = &summary.name {
        return Ok(name.clone());
    }
    if let Some(alias) = &summary.canonical_alias {
        return Ok(alias.clone());
    }

    let room_id = &summary.room_id;
    let mut names = Vec::new();
    for hero in summary.heroes.iter().filter(|h| h.as_str() != own_user.as_str()) {
        names.push(member_name(tables, room_id, hero)?);
    }

    if names.is_empty() && summary.membership == Membership::Invited {
        // Invite previews name the room after whoever invited us.
        if let Some(invite) = tables.current_state_event(room_id, EVENT_ROOM_MEMBER, own_user.as_str())? {
            if invite.sender != *own_user {
                names.push(member_name(tables, room_id, invite.sender.as_str())?);
            }
        }
    }

    let others = (summary.joined_member_count + summary.invited_member_count)
        .saturating_sub(1)
        .max(names.len() as u64);

    Ok(match names.as_slice() {
        [] => EMPTY_ROOM_NAME.to_string(),
        [only] if others <= 1 => only.clone(),
        [first, second] if others == 2 => format!("{first} and {second}"),
        [first] => format!("{first} and {} others", others - 1),
        [first, second, ..] => format!("{first}, {second} and {} others", others - 2),
    })
}

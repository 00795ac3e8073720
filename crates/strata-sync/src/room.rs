//! Per-room handling of one sync payload, dispatched on the section that
//! names the room.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use strata_crypto::CryptoService;
use strata_shared::constants::{EVENT_ROOM_ENCRYPTION, EVENT_ROOM_MEMBER};
use strata_shared::sync::{InvitedRoom, JoinedRoom, LeftRoom, RoomSummaryPayload, Timeline, UnreadNotifications};
use strata_shared::{Event, Membership, RoomId, UserId};
use strata_store::Tables;

use crate::account_data::apply_room_account_data;
use crate::ephemeral::apply_ephemeral;
use crate::error::Result;
use crate::summary::{update_summary, SummaryUpdate};
use crate::timeline::{merge_events, parse_events};

#[derive(Debug, Clone, Default)]
pub struct PreparedTimeline {
    pub events: Vec<Event>,
    pub limited: bool,
    pub prev_batch: Option<String>,
}

impl PreparedTimeline {
    fn parse(timeline: &Timeline, room_id: &RoomId) -> Self {
        Self {
            events: parse_events(&timeline.events, room_id),
            limited: timeline.limited,
            prev_batch: timeline.prev_batch.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinedUpdate {
    pub state: Vec<Event>,
    pub timeline: PreparedTimeline,
    pub ephemeral: Vec<Value>,
    pub account_data: Vec<Value>,
    pub summary: RoomSummaryPayload,
    pub unread: UnreadNotifications,
}

#[derive(Debug, Clone, Default)]
pub struct InvitedUpdate {
    pub invite_state: Vec<Event>,
}

#[derive(Debug, Clone, Default)]
pub struct LeftUpdate {
    pub state: Vec<Event>,
    pub timeline: PreparedTimeline,
    pub account_data: Vec<Value>,
}

/// One room section of a sync payload with its events normalised.
#[derive(Debug, Clone)]
pub enum RoomUpdate {
    Joined(JoinedUpdate),
    Invited(InvitedUpdate),
    Left(LeftUpdate),
}

impl RoomUpdate {
    pub fn joined(room_id: &RoomId, room: &JoinedRoom) -> Self {
        RoomUpdate::Joined(JoinedUpdate {
            state: parse_events(&room.state.events, room_id),
            timeline: PreparedTimeline::parse(&room.timeline, room_id),
            ephemeral: room.ephemeral.events.clone(),
            account_data: room.account_data.events.clone(),
            summary: room.summary.clone(),
            unread: room.unread_notifications.clone(),
        })
    }

    pub fn invited(room_id: &RoomId, room: &InvitedRoom) -> Self {
        let invite_state = room
            .invite_state
            .events
            .iter()
            .filter_map(|raw| match Event::from_stripped_state(raw, room_id) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "skipping malformed invite state");
                    None
                }
            })
            .collect();
        RoomUpdate::Invited(InvitedUpdate { invite_state })
    }

    pub fn left(room_id: &RoomId, room: &LeftRoom) -> Self {
        RoomUpdate::Left(LeftUpdate {
            state: parse_events(&room.state.events, room_id),
            timeline: PreparedTimeline::parse(&room.timeline, room_id),
            account_data: room.account_data.events.clone(),
        })
    }

    pub fn membership(&self) -> Membership {
        match self {
            RoomUpdate::Joined(_) => Membership::Joined,
            RoomUpdate::Invited(_) => Membership::Invited,
            RoomUpdate::Left(_) => Membership::Left,
        }
    }

    /// Timeline events still to be decrypted before the update is applied.
    pub fn timeline_events_mut(&mut self) -> Option<&mut Vec<Event>> {
        match self {
            RoomUpdate::Joined(u) => Some(&mut u.timeline.events),
            RoomUpdate::Left(_) | RoomUpdate::Invited(_) => None,
        }
    }
}

/// What applying a room update changed.
#[derive(Debug, Clone)]
pub struct RoomOutcome {
    pub room_id: RoomId,
    pub membership: Membership,
    /// Timeline events newly placed in the live chunk.
    pub events: Vec<Event>,
    pub members_changed: bool,
    pub encryption_enabled: bool,
}

pub struct RoomSyncHandler {
    crypto: Arc<dyn CryptoService>,
    own_user: UserId,
}

fn carries(events: &[Event], event_type: &str) -> bool {
    events.iter().any(|e| e.is_state() && e.event_type == event_type)
}

impl RoomSyncHandler {
    pub fn new(crypto: Arc<dyn CryptoService>, own_user: UserId) -> Self {
        Self { crypto, own_user }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoService> {
        &self.crypto
    }

    pub fn handle(
        &self,
        tables: Tables<'_>,
        room_id: &RoomId,
        update: &RoomUpdate,
        is_initial_sync: bool,
    ) -> Result<RoomOutcome> {
        match update {
            RoomUpdate::Joined(u) => self.handle_joined(tables, room_id, u, is_initial_sync),
            RoomUpdate::Invited(u) => self.handle_invited(tables, room_id, u),
            RoomUpdate::Left(u) => self.handle_left(tables, room_id, u),
        }
    }

    fn apply_state(&self, tables: Tables<'_>, room_id: &RoomId, events: &[Event]) -> Result<()> {
        for event in events.iter().filter(|e| e.is_state()) {
            tables.upsert_event(event)?;
            tables.insert_untimelined_state(event)?;
            tables.set_current_state(event)?;
            self.crypto.on_state_event(room_id, event);
        }
        Ok(())
    }

    fn handle_joined(
        &self,
        tables: Tables<'_>,
        room_id: &RoomId,
        update: &JoinedUpdate,
        is_initial_sync: bool,
    ) -> Result<RoomOutcome> {
        let previous = tables.membership(room_id)?;
        if previous == Some(Membership::Invited) {
            debug!(room_id = %room_id, "joined invited room, dropping invite preview");
            tables.clear_current_state(room_id)?;
            discard_room_cache(tables, room_id)?;
        }
        tables.set_membership(room_id, Membership::Joined)?;

        apply_ephemeral(tables, room_id, &update.ephemeral)?;
        apply_room_account_data(tables, room_id, &update.account_data)?;

        if is_initial_sync {
            tables.clear_untimelined_state(room_id)?;
            tables.clear_current_state(room_id)?;
        }
        self.apply_state(tables, room_id, &update.state)?;

        let timeline = &update.timeline;
        let merge = merge_events(
            tables,
            room_id,
            &timeline.events,
            timeline.prev_batch.as_deref(),
            timeline.limited,
            is_initial_sync,
        )?;
        for event in &merge.inserted {
            self.crypto.on_live_event(room_id, event);
        }
        if merge.discarded_history || is_initial_sync {
            tables.prune_orphan_events(room_id)?;
        }

        let members_changed = is_initial_sync
            || previous != Some(Membership::Joined)
            || carries(&update.state, EVENT_ROOM_MEMBER)
            || carries(&merge.inserted, EVENT_ROOM_MEMBER);
        let encryption_enabled =
            carries(&update.state, EVENT_ROOM_ENCRYPTION) || carries(&merge.inserted, EVENT_ROOM_ENCRYPTION);

        update_summary(
            tables,
            room_id,
            &self.own_user,
            SummaryUpdate {
                membership: Membership::Joined,
                payload: Some(&update.summary),
                unread: Some(&update.unread),
                members_changed,
            },
        )?;

        Ok(RoomOutcome {
            room_id: room_id.clone(),
            membership: Membership::Joined,
            events: merge.inserted,
            members_changed,
            encryption_enabled,
        })
    }

    fn handle_invited(&self, tables: Tables<'_>, room_id: &RoomId, update: &InvitedUpdate) -> Result<RoomOutcome> {
        tables.set_membership(room_id, Membership::Invited)?;
        // Each invite section carries the whole preview.
        tables.clear_untimelined_state(room_id)?;
        self.apply_state(tables, room_id, &update.invite_state)?;

        update_summary(
            tables,
            room_id,
            &self.own_user,
            SummaryUpdate {
                members_changed: true,
                ..SummaryUpdate::new(Membership::Invited)
            },
        )?;

        Ok(RoomOutcome {
            room_id: room_id.clone(),
            membership: Membership::Invited,
            events: Vec::new(),
            members_changed: true,
            encryption_enabled: false,
        })
    }

    fn handle_left(&self, tables: Tables<'_>, room_id: &RoomId, update: &LeftUpdate) -> Result<RoomOutcome> {
        tables.set_membership(room_id, Membership::Left)?;
        apply_room_account_data(tables, room_id, &update.account_data)?;

        // Keep the final state (our leave event, the name) for the summary.
        for event in update.state.iter().chain(&update.timeline.events).filter(|e| e.is_state()) {
            tables.upsert_event(event)?;
            tables.set_current_state(event)?;
        }
        discard_room_cache(tables, room_id)?;

        update_summary(
            tables,
            room_id,
            &self.own_user,
            SummaryUpdate {
                members_changed: true,
                ..SummaryUpdate::new(Membership::Left)
            },
        )?;
        info!(room_id = %room_id, "left room");

        Ok(RoomOutcome {
            room_id: room_id.clone(),
            membership: Membership::Left,
            events: Vec::new(),
            members_changed: true,
            encryption_enabled: false,
        })
    }
}

/// Drop the room's chunks, untimelined state and the events nothing refers
/// to any more.
fn discard_room_cache(tables: Tables<'_>, room_id: &RoomId) -> Result<()> {
    tables.delete_room_chunks(room_id)?;
    tables.clear_untimelined_state(room_id)?;
    tables.prune_orphan_events(room_id)?;
    Ok(())
}

/// Users whose devices receive the room key of an encrypted room: joined
/// and invited members.
pub fn encryption_recipients(tables: Tables<'_>, room_id: &RoomId) -> Result<Vec<UserId>> {
    let members = tables
        .current_state_of_type(room_id, EVENT_ROOM_MEMBER)?
        .into_iter()
        .filter(|e| {
            matches!(
                e.content.get("membership").and_then(Value::as_str),
                Some("join") | Some("invite")
            )
        })
        .filter_map(|e| e.state_key.and_then(|k| UserId::parse(k).ok()))
        .collect();
    Ok(members)
}

//! Wire model of the sync endpoint response and of the room messages
//! endpoint used for backward pagination.
//!
//! Events stay as raw JSON here; they are normalised one by one when they
//! are handled so that a single malformed event cannot reject a payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
    #[serde(default)]
    pub to_device: EventList,
    #[serde(default)]
    pub account_data: EventList,
    #[serde(default)]
    pub device_lists: DeviceLists,
    #[serde(default)]
    pub device_one_time_keys_count: BTreeMap<String, u64>,
}

impl SyncResponse {
    pub fn has_to_device_events(&self) -> bool {
        !self.to_device.events.is_empty()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.join.len() + self.rooms.invite.len() + self.rooms.leave.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Room sections keyed by raw room id. Keys are validated by the handler so
/// that one bad id only drops its own room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoom>,
    #[serde(default)]
    pub leave: BTreeMap<String, LeftRoom>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub summary: RoomSummaryPayload,
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub ephemeral: EventList,
    #[serde(default)]
    pub account_data: EventList,
    #[serde(default)]
    pub unread_notifications: UnreadNotifications,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeftRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub account_data: EventList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub prev_batch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomSummaryPayload {
    #[serde(rename = "m.heroes", default)]
    pub heroes: Option<Vec<String>>,
    #[serde(rename = "m.joined_member_count", default)]
    pub joined_member_count: Option<u64>,
    #[serde(rename = "m.invited_member_count", default)]
    pub invited_member_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnreadNotifications {
    #[serde(default)]
    pub highlight_count: Option<u64>,
    #[serde(default)]
    pub notification_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceLists {
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default)]
    pub left: Vec<String>,
}

/// Response of `GET /rooms/{roomId}/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub chunk: Vec<Value>,
    #[serde(default)]
    pub state: Vec<Value>,
}

/// Pagination direction for the messages endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Backward => "b",
            Direction::Forward => "f",
        }
    }
}

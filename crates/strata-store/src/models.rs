//! Records persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strata_shared::{Event, EventId, Membership, RoomId, SendState, TransactionId, UserId};

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A contiguous slice of one room's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk_id: i64,
    pub room_id: RoomId,
    /// Backward pagination cursor. `None` together with `is_last_backward`
    /// means the start of the room's history was reached.
    pub prev_token: Option<String>,
    pub next_token: Option<String>,
    /// The live chunk new sync events are appended to.
    pub is_last_forward: bool,
    pub is_last_backward: bool,
}

/// An event placed in a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub event: Event,
    pub chunk_id: i64,
    pub display_index: i64,
    pub state_index: i64,
}

/// Index extremes of a chunk, `None` for an empty chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min_display_index: i64,
    pub max_display_index: i64,
    pub min_state_index: i64,
    pub max_state_index: i64,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Denormalised room summary, recomputed after every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub membership: Membership,
    pub display_name: String,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar_url: Option<String>,
    pub canonical_alias: Option<String>,
    /// `type` from the create event; `m.space` for spaces.
    pub room_type: Option<String>,
    pub heroes: Vec<String>,
    pub joined_member_count: u64,
    pub invited_member_count: u64,
    pub highlight_count: u64,
    pub notification_count: u64,
    pub latest_event_id: Option<EventId>,
    pub is_encrypted: bool,
    pub is_direct: bool,
    pub typing_users: Vec<String>,
    pub fully_read: Option<String>,
}

impl RoomSummary {
    pub fn new(room_id: RoomId, membership: Membership) -> Self {
        Self {
            room_id,
            membership,
            display_name: String::new(),
            name: None,
            topic: None,
            avatar_url: None,
            canonical_alias: None,
            room_type: None,
            heroes: Vec::new(),
            joined_member_count: 0,
            invited_member_count: 0,
            highlight_count: 0,
            notification_count: 0,
            latest_event_id: None,
            is_encrypted: false,
            is_direct: false,
            typing_users: Vec::new(),
            fully_read: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomTag {
    pub tag: String,
    pub order: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub receipt_type: String,
    pub event_id: EventId,
    pub ts: Option<i64>,
}

// ---------------------------------------------------------------------------
// Local echo
// ---------------------------------------------------------------------------

/// A locally created event awaiting its server-confirmed counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEcho {
    pub transaction_id: TransactionId,
    pub room_id: RoomId,
    pub event_type: String,
    pub sender: UserId,
    pub content: Value,
    pub send_state: SendState,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Device tracking
// ---------------------------------------------------------------------------

/// Download state of a user's device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    NotTracked,
    PendingDownload,
    DownloadInProgress,
    UpToDate,
    UnreachableServer,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::NotTracked => "not_tracked",
            TrackingStatus::PendingDownload => "pending_download",
            TrackingStatus::DownloadInProgress => "download_in_progress",
            TrackingStatus::UpToDate => "up_to_date",
            TrackingStatus::UnreachableServer => "unreachable_server",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_tracked" => Some(TrackingStatus::NotTracked),
            "pending_download" => Some(TrackingStatus::PendingDownload),
            "download_in_progress" => Some(TrackingStatus::DownloadInProgress),
            "up_to_date" => Some(TrackingStatus::UpToDate),
            "unreachable_server" => Some(TrackingStatus::UnreachableServer),
            _ => None,
        }
    }

    pub fn is_tracked(&self) -> bool {
        !matches!(self, TrackingStatus::NotTracked)
    }
}

// ---------------------------------------------------------------------------
// Group session
// ---------------------------------------------------------------------------

/// A stored inbound group session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundGroupSessionRecord {
    pub room_id: RoomId,
    pub session_id: String,
    pub sender_key: String,
    pub signing_key: Option<String>,
    /// Base64 session secret.
    pub session_key: String,
    pub forwarding_chain: Vec<String>,
}

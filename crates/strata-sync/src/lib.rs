//! # strata-sync
//!
//! Applies sync payloads to the local store: the timeline merge engine,
//! per-room handling of joined, invited and left rooms, the crypto side of
//! sync, backward pagination and local echoes. Room event processors are
//! notified once a payload is committed.

pub mod account_data;
pub mod crypto_sync;
pub mod ephemeral;
pub mod error;
pub mod local_echo;
pub mod locks;
pub mod pagination;
pub mod processors;
pub mod response;
pub mod room;
pub mod summary;
pub mod timeline;
pub mod verification;

#[cfg(test)]
mod test_support;

pub use crypto_sync::{CryptoSyncHandler, ToDeviceOutcome};
pub use error::{Result, SyncError};
pub use local_echo::LocalEchoes;
pub use locks::RoomLocks;
pub use pagination::{PaginationOutcome, Paginator};
pub use processors::{
    ChannelProcessor, Processors, RoomEventsMode, RoomEventsProcessor, RoomEventsUpdate,
};
pub use response::{SyncOutcome, SyncResponseHandler};
pub use room::{RoomOutcome, RoomSyncHandler, RoomUpdate};
pub use timeline::{merge_events, parse_events, MergeOutcome};
pub use verification::VerificationTracker;

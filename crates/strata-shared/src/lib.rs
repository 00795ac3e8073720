//! # strata-shared
//!
//! Types shared by every strata crate: validated identifiers, the event
//! envelope, the sync payload and key-exchange wire models, canonical JSON
//! signing helpers and protocol constants.

pub mod constants;
pub mod error;
pub mod events;
pub mod keys;
pub mod signing;
pub mod sync;
pub mod types;

pub use error::{EventError, IdentifierError, SignatureError};
pub use events::{
    DecryptionError, DecryptionErrorKind, DecryptionResult, EncryptedContent, Event,
    ToDeviceEvent, UnsignedData,
};
pub use types::{DeviceId, EventId, Membership, RoomId, SendState, TransactionId, UserId};

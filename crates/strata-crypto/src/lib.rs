//! # strata-crypto
//!
//! End-to-end encryption plumbing for the sync engine: the
//! [`CryptoService`] seam the sync handlers decrypt through, a local
//! implementation of it over the device [`Account`], device-list tracking,
//! the key exchange tasks and the [`KeyManager`] that schedules them.

pub mod account;
pub mod cipher;
pub mod cross_signing;
pub mod device_list;
pub mod error;
pub mod key_manager;
pub mod local;
pub mod locks;
pub mod service;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use account::{Account, SharedAccount};
pub use device_list::{handle_device_list_changes, track_users, DeviceListTracker};
pub use error::{CryptoError, KeyExchangeError, Result};
pub use key_manager::{KeyManager, MissingSessions};
pub use local::LocalCryptoService;
pub use locks::DeviceLocks;
pub use service::{CryptoService, ImportedRoomKey};
pub use tasks::PasswordAuth;

/// Group-message algorithm of [`LocalCryptoService`].
pub const LOCAL_GROUP_ALGORITHM: &str = "org.strata.group.v1.xchacha20poly1305";

/// Pairwise-channel algorithm of [`LocalCryptoService`].
pub const LOCAL_OLM_ALGORITHM: &str = "org.strata.olm.v1.x25519-xchacha20poly1305";

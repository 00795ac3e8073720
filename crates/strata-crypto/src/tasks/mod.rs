//! Key exchange tasks: one network round-trip each, no internal retry.

pub mod claim_keys;
pub mod download_keys;
pub mod key_changes;
pub mod send_to_device;
pub mod uia;
pub mod upload_keys;
pub mod upload_signing_keys;

pub use claim_keys::{claim_one_time_keys, ClaimedKeys};
pub use download_keys::download_device_keys;
pub use key_changes::get_key_changes;
pub use send_to_device::send_to_device;
pub use uia::{with_interactive_auth, PasswordAuth};
pub use upload_keys::upload_keys;
pub use upload_signing_keys::upload_signing_keys;

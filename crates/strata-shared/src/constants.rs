/// Default long-poll timeout for incremental syncs, in milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

/// Default request timeout for key-exchange endpoints, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Delay before retrying a failed sync when the server gives no hint.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;

/// Upper bound for the exponential sync backoff.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 300_000;

/// Number of one-time keys the device tries to keep published on the server.
pub const MAX_ONE_TIME_KEYS: u64 = 100;

/// Default page size for backward pagination.
pub const DEFAULT_PAGINATION_LIMIT: u32 = 30;

// Event types

pub const EVENT_ROOM_CREATE: &str = "m.room.create";
pub const EVENT_ROOM_MEMBER: &str = "m.room.member";
pub const EVENT_ROOM_NAME: &str = "m.room.name";
pub const EVENT_ROOM_TOPIC: &str = "m.room.topic";
pub const EVENT_ROOM_AVATAR: &str = "m.room.avatar";
pub const EVENT_ROOM_CANONICAL_ALIAS: &str = "m.room.canonical_alias";
pub const EVENT_ROOM_ENCRYPTION: &str = "m.room.encryption";
pub const EVENT_ROOM_MESSAGE: &str = "m.room.message";
pub const EVENT_ROOM_ENCRYPTED: &str = "m.room.encrypted";

pub const EVENT_RECEIPT: &str = "m.receipt";
pub const EVENT_TYPING: &str = "m.typing";

pub const EVENT_TAG: &str = "m.tag";
pub const EVENT_FULLY_READ: &str = "m.fully_read";
pub const EVENT_DIRECT: &str = "m.direct";
pub const EVENT_IGNORED_USER_LIST: &str = "m.ignored_user_list";

pub const EVENT_ROOM_KEY: &str = "m.room_key";
pub const EVENT_FORWARDED_ROOM_KEY: &str = "m.forwarded_room_key";
pub const EVENT_VERIFICATION_PREFIX: &str = "m.key.verification.";

// Key algorithms

pub const SIGNED_CURVE25519: &str = "signed_curve25519";

// Error codes

pub const M_UNKNOWN_TOKEN: &str = "M_UNKNOWN_TOKEN";
pub const M_MISSING_TOKEN: &str = "M_MISSING_TOKEN";
pub const M_LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";

// Interactive authentication

pub const AUTH_TYPE_PASSWORD: &str = "m.login.password";
pub const IDENTIFIER_TYPE_USER: &str = "m.id.user";

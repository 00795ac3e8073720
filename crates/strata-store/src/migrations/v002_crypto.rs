//! v002 -- Key material.
//!
//! Device keys of other users with their download tracking, cross-signing
//! keys, the local device account and inbound group sessions.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS device_keys (
    user_id    TEXT NOT NULL,
    device_id  TEXT NOT NULL,
    ed25519    TEXT,
    curve25519 TEXT,
    keys_json  TEXT NOT NULL,                       -- signed DeviceKeys object
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, device_id)
);

CREATE TABLE IF NOT EXISTS device_tracking (
    user_id    TEXT PRIMARY KEY NOT NULL,
    status     TEXT NOT NULL,
    watermark  TEXT,                                -- sync token at download
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cross_signing_keys (
    user_id  TEXT NOT NULL,
    usage    TEXT NOT NULL,                         -- master | self_signing | user_signing
    key_json TEXT NOT NULL,

    PRIMARY KEY (user_id, usage)
);

CREATE TABLE IF NOT EXISTS crypto_account (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    pickle     TEXT NOT NULL,                       -- JSON, secret key material
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inbound_group_sessions (
    room_id          TEXT NOT NULL,
    session_id       TEXT NOT NULL,
    sender_key       TEXT NOT NULL,
    signing_key      TEXT,
    session_key      TEXT NOT NULL,                 -- base64 secret
    forwarding_chain TEXT NOT NULL DEFAULT '[]',    -- JSON array
    created_at       TEXT NOT NULL,

    PRIMARY KEY (room_id, session_id)
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

//! v001 -- Rooms and timelines.
//!
//! Creates the room summary, chunk, event and state tables together with
//! local echoes, account data, receipts and the sync token.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms (membership + denormalised summary)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    room_id              TEXT PRIMARY KEY NOT NULL,
    membership           TEXT NOT NULL,             -- join | invite | leave
    display_name         TEXT NOT NULL DEFAULT '',
    name                 TEXT,
    topic                TEXT,
    avatar_url           TEXT,
    canonical_alias      TEXT,
    room_type            TEXT,
    heroes               TEXT NOT NULL DEFAULT '[]', -- JSON array of user ids
    joined_member_count  INTEGER NOT NULL DEFAULT 0,
    invited_member_count INTEGER NOT NULL DEFAULT 0,
    highlight_count      INTEGER NOT NULL DEFAULT 0,
    notification_count   INTEGER NOT NULL DEFAULT 0,
    latest_event_id      TEXT,
    is_encrypted         INTEGER NOT NULL DEFAULT 0,
    is_direct            INTEGER NOT NULL DEFAULT 0,
    typing_users         TEXT NOT NULL DEFAULT '[]', -- JSON array of user ids
    fully_read           TEXT,
    updated_at           TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chunks: contiguous timeline slices with pagination tokens
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id          TEXT NOT NULL,
    prev_token       TEXT,                          -- NULL = start of history
    next_token       TEXT,                          -- NULL = open end
    is_last_forward  INTEGER NOT NULL DEFAULT 0,
    is_last_backward INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chunks_room ON chunks(room_id);

-- At most one live chunk per room.
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_live
    ON chunks(room_id) WHERE is_last_forward = 1;

-- ----------------------------------------------------------------
-- Events: immutable envelopes plus decryption outcome
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS events (
    event_id              TEXT PRIMARY KEY NOT NULL,
    room_id               TEXT NOT NULL,
    type                  TEXT NOT NULL,
    sender                TEXT NOT NULL,
    origin_server_ts      INTEGER NOT NULL,
    state_key             TEXT,
    content               TEXT NOT NULL,            -- JSON object
    unsigned              TEXT,                     -- JSON object
    redacts               TEXT,
    decryption_result     TEXT,                     -- JSON, never cleared once set
    decryption_error      TEXT,                     -- JSON
    decryption_session_id TEXT                      -- session a failed decryption waits on
);

CREATE INDEX IF NOT EXISTS idx_events_room ON events(room_id);
CREATE INDEX IF NOT EXISTS idx_events_waiting_session
    ON events(room_id, decryption_session_id)
    WHERE decryption_session_id IS NOT NULL;

-- ----------------------------------------------------------------
-- Chunk membership of events, ordered by display_index
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chunk_events (
    chunk_id      INTEGER NOT NULL,
    event_id      TEXT NOT NULL,
    display_index INTEGER NOT NULL,
    state_index   INTEGER NOT NULL,

    PRIMARY KEY (chunk_id, event_id),
    FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    FOREIGN KEY (event_id) REFERENCES events(event_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunk_events_order
    ON chunk_events(chunk_id, display_index);
CREATE INDEX IF NOT EXISTS idx_chunk_events_event ON chunk_events(event_id);

-- ----------------------------------------------------------------
-- State delivered outside the timeline, one row per state slot
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS untimelined_state (
    room_id     TEXT NOT NULL,
    type        TEXT NOT NULL,
    state_key   TEXT NOT NULL,
    event_id    TEXT NOT NULL,
    state_index INTEGER NOT NULL,

    PRIMARY KEY (room_id, type, state_key),
    FOREIGN KEY (event_id) REFERENCES events(event_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Current room state
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS current_state (
    room_id   TEXT NOT NULL,
    type      TEXT NOT NULL,
    state_key TEXT NOT NULL,
    event_id  TEXT NOT NULL,

    PRIMARY KEY (room_id, type, state_key),
    FOREIGN KEY (event_id) REFERENCES events(event_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Local echoes awaiting server confirmation
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_echoes (
    transaction_id TEXT PRIMARY KEY NOT NULL,
    room_id        TEXT NOT NULL,
    type           TEXT NOT NULL,
    sender         TEXT NOT NULL,
    content        TEXT NOT NULL,                   -- JSON object
    send_state     TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_local_echoes_room
    ON local_echoes(room_id, created_at);

-- ----------------------------------------------------------------
-- Account data (room_id = '' for global data)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS account_data (
    room_id TEXT NOT NULL,
    type    TEXT NOT NULL,
    content TEXT NOT NULL,

    PRIMARY KEY (room_id, type)
);

CREATE TABLE IF NOT EXISTS room_tags (
    room_id   TEXT NOT NULL,
    tag       TEXT NOT NULL,
    tag_order REAL,

    PRIMARY KEY (room_id, tag)
);

-- ----------------------------------------------------------------
-- Read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS read_receipts (
    room_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    receipt_type TEXT NOT NULL,
    event_id     TEXT NOT NULL,
    ts           INTEGER,

    PRIMARY KEY (room_id, user_id, receipt_type)
);

-- ----------------------------------------------------------------
-- Sync token (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sync_token (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    token      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

//! v001 -- Initial schema creation.
//!
//! Creates the config-projection tables (`profiles`, `groups`,
//! `group_members`, `open_groups`), the message-side tables
//! (`interactions`, `reactions`) and the durable `config_dumps` store.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles (projection of the user-profile / contacts namespaces)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    account_id   TEXT PRIMARY KEY NOT NULL,   -- 66-char prefixed hex id
    display_name TEXT,
    avatar_url   TEXT,
    avatar_key   TEXT,                        -- hex-encoded 32-byte key
    avatar_path  TEXT,                        -- local file, when downloaded
    updated_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Groups (projection of the group-info namespace)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    group_id                TEXT PRIMARY KEY NOT NULL,
    name                    TEXT NOT NULL,
    description             TEXT,
    avatar_url              TEXT,
    avatar_key              TEXT,
    expiry_seconds          INTEGER,
    delete_before_ms        INTEGER,
    attach_delete_before_ms INTEGER,
    destroyed               INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    local_is_admin          INTEGER NOT NULL DEFAULT 0,
    created_at              TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Group members (projection of the group-members namespace)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_id   TEXT NOT NULL,
    account_id TEXT NOT NULL,
    role       TEXT NOT NULL,                 -- 'member' | 'admin'
    joined_at  TEXT NOT NULL,

    PRIMARY KEY (group_id, account_id),
    FOREIGN KEY (group_id) REFERENCES groups(group_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Open groups (community rooms)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS open_groups (
    server       TEXT NOT NULL,
    room         TEXT NOT NULL,
    name         TEXT NOT NULL,
    image_id     TEXT,
    image_path   TEXT,                        -- local file, when downloaded
    info_updates INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,

    PRIMARY KEY (server, room)
);

-- ----------------------------------------------------------------
-- Interactions (messages with their send-state machine)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS interactions (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    thread_id         TEXT NOT NULL,
    author            TEXT NOT NULL,              -- prefixed hex id
    body              TEXT,
    state             TEXT NOT NULL,              -- send-state machine
    failure_text      TEXT,
    server_hash       TEXT,
    sent_timestamp_ms INTEGER NOT NULL,
    has_attachments   INTEGER NOT NULL DEFAULT 0,
    expires_in_ms     INTEGER,
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interactions_thread_ts
    ON interactions(thread_id, sent_timestamp_ms DESC);

CREATE UNIQUE INDEX IF NOT EXISTS idx_interactions_dedup
    ON interactions(thread_id, sent_timestamp_ms, author);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    interaction_id TEXT NOT NULL,
    emoji          TEXT NOT NULL,
    author         TEXT NOT NULL,
    server_hash    TEXT,
    created_at     TEXT NOT NULL,

    FOREIGN KEY (interaction_id) REFERENCES interactions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_interaction ON reactions(interaction_id);

-- ----------------------------------------------------------------
-- Config dumps (durable snapshots of in-memory config state)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS config_dumps (
    owner      TEXT NOT NULL,                 -- owning identity, prefixed hex
    namespace  INTEGER NOT NULL,
    version    INTEGER NOT NULL,
    data       BLOB NOT NULL,                 -- encrypted snapshot
    updated_at TEXT NOT NULL,

    PRIMARY KEY (owner, namespace)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

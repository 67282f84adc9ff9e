//! v001 -- Initial schema creation.
//!
//! Creates `users`, `sessions`, `contact_requests`, `contacts` and `messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (owned by the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    username   TEXT NOT NULL UNIQUE,
    email      TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL                  -- RFC-3339, microseconds, UTC
);

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY NOT NULL,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Contact requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contact_requests (
    id          TEXT PRIMARY KEY NOT NULL,
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contact_requests_receiver
    ON contact_requests (receiver_id, status);

CREATE INDEX IF NOT EXISTS idx_contact_requests_pair
    ON contact_requests (sender_id, receiver_id, status);

-- ----------------------------------------------------------------
-- Contacts (one row per direction)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id         TEXT PRIMARY KEY NOT NULL,
    user_id    TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, contact_id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,
    sender_id      TEXT NOT NULL,
    receiver_id    TEXT NOT NULL,
    message_type   TEXT NOT NULL CHECK (message_type IN ('text', 'file')),
    content        TEXT NOT NULL DEFAULT '',
    file_path      TEXT,
    file_name      TEXT,
    file_mime_type TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages (sender_id, receiver_id, created_at);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

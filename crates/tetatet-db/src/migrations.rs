use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            full_name   TEXT,
            last_seen   TEXT,
            created_at  TEXT NOT NULL
        );

        -- One chat per unordered user pair. The pair is canonicalized to
        -- user_lo < user_hi before insert, so the UNIQUE index is the
        -- authoritative duplicate guard under concurrent creation.
        CREATE TABLE IF NOT EXISTS chats (
            id              TEXT PRIMARY KEY,
            user_lo         TEXT NOT NULL REFERENCES users(id),
            user_hi         TEXT NOT NULL REFERENCES users(id),
            last_message    TEXT,
            updated_at      TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(user_lo, user_hi)
        );

        CREATE INDEX IF NOT EXISTS idx_chats_user_lo ON chats(user_lo);
        CREATE INDEX IF NOT EXISTS idx_chats_user_hi ON chats(user_hi);

        -- AUTOINCREMENT ids are monotone with creation time: they double as
        -- the history ordering tie-break and the pagination cursor.
        -- reply_to has no foreign key: it is a lookup, not an ownership
        -- edge, and must survive deletion of its target as a dangling id.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            text        TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'sent',
            reply_to    INTEGER,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);
        ",
    )?;

    info!("database migrations complete");
    Ok(())
}

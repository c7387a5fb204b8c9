use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::Database;
use crate::models::{ChatRow, MessageRow, ReceiptRow, UserRow};

const USER_COLS: &str = "id, username, email, password, full_name, last_seen, created_at";
const CHAT_COLS: &str = "id, user_lo, user_hi, last_message, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, full_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    username,
                    email,
                    password_hash,
                    full_name,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    /// Existence probe used by sign_up to produce field-keyed errors.
    /// The UNIQUE constraints remain the race backstop.
    pub fn user_exists(&self, username: &str, email: &str) -> Result<(bool, bool)> {
        self.with_conn(|conn| {
            let by_name: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )?;
            let by_email: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                [email],
                |row| row.get(0),
            )?;
            Ok((by_name > 0, by_email > 0))
        })
    }

    /// Case-insensitive substring match on username.
    pub fn search_users(&self, q: &str, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", q.to_lowercase());
            let sql = format!(
                "SELECT {USER_COLS} FROM users WHERE LOWER(username) LIKE ?1 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    // -- Chats --

    /// Look up the chat for an unordered user pair, creating it on first
    /// contact. The pair is canonicalized and inserted with OR IGNORE, so
    /// two racing callers both land on the single row the unique index
    /// admits.
    pub fn get_or_create_chat(&self, user_a: &str, user_b: &str) -> Result<ChatRow> {
        let (lo, hi) = if user_a <= user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO chats (id, user_lo, user_hi, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![Uuid::new_v4().to_string(), lo, hi, now, now],
            )?;

            let sql =
                format!("SELECT {CHAT_COLS} FROM chats WHERE user_lo = ?1 AND user_hi = ?2");
            let row = conn.query_row(&sql, [lo, hi], chat_from_row)?;
            Ok(row)
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHAT_COLS} FROM chats WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], chat_from_row).optional()
        })
    }

    /// All chats of a user, most recently active first.
    pub fn chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLS} FROM chats
                 WHERE user_lo = ?1 OR user_hi = ?1
                 ORDER BY updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages addressed to `viewer` that they have not read yet.
    pub fn unread_count(&self, chat_id: &str, viewer: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2 AND status = 'sent'",
                [chat_id, viewer],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Messages --

    /// Insert a message and refresh the chat's denormalized preview in the
    /// same transaction. Returns the assigned message id.
    pub fn insert_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        text: &str,
        reply_to: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, text, status, reply_to, created_at)
                 VALUES (?1, ?2, ?3, 'sent', ?4, ?5)",
                rusqlite::params![chat_id, sender_id, text, reply_to, at.to_rfc3339()],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE chats SET last_message = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![text, at.to_rfc3339(), chat_id],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, m.text, m.status, m.reply_to,
                        r.text, m.created_at
                 FROM messages m
                 LEFT JOIN messages r ON m.reply_to = r.id
                 WHERE m.id = ?1",
            )?;
            stmt.query_row([id], message_from_row).optional()
        })
    }

    /// One page of history, strictly older than `before` (all of history if
    /// no cursor), returned in chronological order. The second tuple field
    /// reports whether anything older than the page remains.
    ///
    /// Fetches page_size + 1 rows newest-first; the sentinel row is the
    /// has_more signal and never returned. Concurrent inserts of newer
    /// messages cannot shift this window.
    pub fn page_messages(
        &self,
        chat_id: &str,
        page_size: u32,
        before: Option<i64>,
    ) -> Result<(Vec<MessageRow>, bool)> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, m.text, m.status, m.reply_to,
                        r.text, m.created_at
                 FROM messages m
                 LEFT JOIN messages r ON m.reply_to = r.id
                 WHERE m.chat_id = ?1 AND (?2 IS NULL OR m.id < ?2)
                 ORDER BY m.id DESC
                 LIMIT ?3",
            )?;
            let mut rows = stmt
                .query_map(
                    rusqlite::params![chat_id, before, page_size + 1],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let has_more = rows.len() > page_size as usize;
            rows.truncate(page_size as usize);
            rows.reverse();
            Ok((rows, has_more))
        })
    }

    /// Returns false if the message no longer exists.
    pub fn update_message_text(&self, id: i64, text: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = ?1 WHERE id = ?2",
                rusqlite::params![text, id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Permanent removal, no tombstone.
    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Resolve a batch of message ids to their chats for receipt routing.
    /// Ids that no longer exist are simply absent from the result.
    pub fn resolve_receipts(&self, ids: &[i64]) -> Result<Vec<ReceiptRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT m.id, c.id, c.user_lo, c.user_hi
                 FROM messages m
                 JOIN chats c ON m.chat_id = c.id
                 WHERE m.id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReceiptRow {
                        message_id: row.get(0)?,
                        chat_id: row.get(1)?,
                        user_lo: row.get(2)?,
                        user_hi: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Mark a batch read in a single statement. Already-read and missing
    /// ids are tolerated; `read` never regresses to `sent`. Returns how
    /// many rows actually changed.
    pub fn mark_read(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE messages SET status = 'read'
                 WHERE id IN ({}) AND status != 'read'",
                placeholders.join(", ")
            );

            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let changed = conn.execute(&sql, params.as_slice())?;
            Ok(changed)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        full_name: row.get(4)?,
        last_seen: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn chat_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<ChatRow, rusqlite::Error> {
    Ok(ChatRow {
        id: row.get(0)?,
        user_lo: row.get(1)?,
        user_hi: row.get(2)?,
        last_message: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        status: row.get(4)?,
        reply_to: row.get(5)?,
        reply_text: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

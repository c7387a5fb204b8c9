/// Database row types — these map directly to SQLite rows. Conversion to
/// the client-facing view types happens in the gateway.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct ChatRow {
    pub id: String,
    pub user_lo: String,
    pub user_hi: String,
    pub last_message: Option<String>,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub status: String,
    pub reply_to: Option<i64>,
    /// Text of the reply target, resolved by lookup at query time.
    /// `None` when there is no reply or the target was deleted.
    pub reply_text: Option<String>,
    pub created_at: String,
}

/// Join row used to route read receipts: which chat a marked message
/// belongs to, and who the participants are.
pub struct ReceiptRow {
    pub message_id: i64,
    pub chat_id: String,
    pub user_lo: String,
    pub user_hi: String,
}

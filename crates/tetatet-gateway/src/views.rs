//! Row-to-view conversions. Storage keeps ids and timestamps as text;
//! corrupt values are logged and defaulted instead of taking the
//! connection down.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use tetatet_db::models::{ChatRow, MessageRow, UserRow};
use tetatet_types::events::ChatRef;
use tetatet_types::models::{MessageBody, MessageStatus, PeerView, ReplyView, UserView};

pub(crate) fn parse_uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("corrupt uuid '{}': {}", raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("corrupt timestamp '{}': {}", raw, e);
        DateTime::default()
    })
}

fn parse_ts_opt(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_ts)
}

pub(crate) fn user_view(row: &UserRow) -> UserView {
    UserView {
        id: parse_uuid(&row.id),
        username: row.username.clone(),
        email: row.email.clone(),
        full_name: row.full_name.clone(),
        last_seen: parse_ts_opt(&row.last_seen),
    }
}

pub(crate) fn peer_view(row: &UserRow, is_online: bool) -> PeerView {
    PeerView {
        id: parse_uuid(&row.id),
        username: row.username.clone(),
        full_name: row.full_name.clone(),
        is_online,
        last_seen: parse_ts_opt(&row.last_seen),
    }
}

pub(crate) fn chat_ref(row: &ChatRow) -> ChatRef {
    ChatRef {
        id: parse_uuid(&row.id),
        user_lo: parse_uuid(&row.user_lo),
        user_hi: parse_uuid(&row.user_hi),
    }
}

pub(crate) fn message_body(row: &MessageRow) -> MessageBody {
    MessageBody {
        id: row.id,
        chat_id: parse_uuid(&row.chat_id),
        sender_id: parse_uuid(&row.sender_id),
        text: row.text.clone(),
        status: MessageStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("corrupt status '{}' on message {}", row.status, row.id);
            MessageStatus::Sent
        }),
        reply_to: row.reply_to.map(|id| ReplyView {
            id,
            text: row.reply_text.clone(),
        }),
        created_at: parse_ts(&row.created_at),
    }
}

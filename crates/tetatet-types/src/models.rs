use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message lifecycle status. Transitions are monotonic: `sent` -> `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Public user profile as sent to clients. The password hash never leaves
/// the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// The other participant of a chat, with live presence attached.
/// `is_online` is derived from the connection registry at render time,
/// never read from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One entry of the `get_chats` listing, ordered by `updated_at` descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPreview {
    pub id: Uuid,
    pub user: PeerView,
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub unread: i64,
}

/// Resolved reply reference. `text` is `None` when the referenced message
/// has since been deleted; the id is kept so clients can show a stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyView {
    pub id: i64,
    pub text: Option<String>,
}

/// Viewer-independent message data. Serialized to clients only through
/// [`MessageView`], which adds the per-viewer `is_mine` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub id: i64,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub status: MessageStatus,
    pub reply_to: Option<ReplyView>,
    pub created_at: DateTime<Utc>,
}

impl MessageBody {
    /// Render for a specific viewer. `is_mine` must be recomputed per
    /// recipient; a frame built for the sender is never reused for the peer.
    pub fn view_for(&self, viewer: Uuid) -> MessageView {
        MessageView {
            is_mine: self.sender_id == viewer,
            body: self.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub body: MessageBody,
    pub is_mine: bool,
}

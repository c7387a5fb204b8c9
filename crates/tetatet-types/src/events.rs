use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::MessageBody;
use crate::wire;

/// A chat as the fanout engine sees it: the id plus the canonicalized
/// participant pair. Enough to answer "who is the other side".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRef {
    pub id: Uuid,
    pub user_lo: Uuid,
    pub user_hi: Uuid,
}

impl ChatRef {
    pub fn participants(&self) -> [Uuid; 2] {
        [self.user_lo, self.user_hi]
    }

    /// The participant that is not `user`, or `None` if `user` is not in
    /// this chat at all.
    pub fn peer_of(&self, user: Uuid) -> Option<Uuid> {
        if user == self.user_lo {
            Some(self.user_hi)
        } else if user == self.user_hi {
            Some(self.user_lo)
        } else {
            None
        }
    }

    pub fn contains(&self, user: Uuid) -> bool {
        user == self.user_lo || user == self.user_hi
    }
}

/// Read receipts aggregated per chat: one event per (chat, peer) regardless
/// of how many message ids the batch touched in that chat.
#[derive(Debug, Clone)]
pub struct ReadReceipt {
    pub chat: ChatRef,
    pub message_ids: Vec<i64>,
}

/// A state-changing outcome handed to the fanout engine. The engine computes
/// the recipient set, materializes a transient update record and delivers it
/// to every live connection of every recipient.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewMessage {
        chat: ChatRef,
        message: MessageBody,
    },
    MessageEdited {
        chat: ChatRef,
        actor: Uuid,
        message_id: i64,
        text: String,
    },
    MessageDeleted {
        chat: ChatRef,
        actor: Uuid,
        message_id: i64,
    },
    MessagesRead {
        reader: Uuid,
        receipts: Vec<ReadReceipt>,
    },
    StatusChange {
        user_id: Uuid,
        online: bool,
        last_seen: DateTime<Utc>,
    },
}

impl ChatEvent {
    /// Wire action name of the push frame this event produces.
    pub fn action(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageEdited { .. } => "edit_message",
            Self::MessageDeleted { .. } => "delete_message",
            Self::MessagesRead { .. } => "read_message",
            Self::StatusChange { .. } => wire::STATUS_CHANGE,
        }
    }
}

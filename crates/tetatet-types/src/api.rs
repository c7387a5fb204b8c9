use serde::Deserialize;
use uuid::Uuid;

// Request payloads for the `data` half of the wire envelope.
//
// Required string fields default to empty instead of failing deserialization:
// a missing field must come back as a field-keyed validation error, not as a
// dropped frame.

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersRequest {
    pub q: Option<String>,
}

/// `chat_id` and `user_id` are alternatives: addressing a user implicitly
/// resolves (or lazily creates) the chat with them.
#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    pub chat_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub text: String,
    pub reply_to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GetMessagesRequest {
    pub chat_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    /// Cursor: id of the oldest message the client already has.
    pub last_message: Option<i64>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    pub message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub message_id: Option<i64>,
    #[serde(default)]
    pub text: String,
}

/// Accepts a single id, a batch, or both; the union is marked in one call.
#[derive(Debug, Deserialize)]
pub struct ReadMessageRequest {
    pub message_id: Option<i64>,
    #[serde(default)]
    pub message_ids: Vec<i64>,
}

impl ReadMessageRequest {
    pub fn ids(&self) -> Vec<i64> {
        let mut ids = self.message_ids.clone();
        if let Some(id) = self.message_id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

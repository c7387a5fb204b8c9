use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound client envelope. `data` defaults to null so an envelope without a
/// payload still decodes; handlers do their own field validation.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// Outbound frame, used both for direct replies and server-initiated pushes.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub action: String,
    pub success: bool,
    pub data: Value,
}

impl Frame {
    pub fn ok(action: &str, data: Value) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            data,
        }
    }

    pub fn err(action: &str, data: Value) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            data,
        }
    }

    /// Serialize for the transport. Frame contents are always representable,
    /// so serialization cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("frame serialization")
    }
}

/// The sealed set of client-invokable actions. Unknown names fail at
/// dispatch time; the table itself is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    SignUp,
    Authenticate,
    RefreshAccessToken,
    SearchUsers,
    GetChats,
    NewMessage,
    GetMessages,
    DeleteMessage,
    EditMessage,
    ReadMessage,
}

impl Action {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "login" => Some(Self::Login),
            "sign_up" => Some(Self::SignUp),
            "authenticate" => Some(Self::Authenticate),
            "refresh_access_token" => Some(Self::RefreshAccessToken),
            "search_users" => Some(Self::SearchUsers),
            "get_chats" => Some(Self::GetChats),
            "new_message" => Some(Self::NewMessage),
            "get_messages" => Some(Self::GetMessages),
            "delete_message" => Some(Self::DeleteMessage),
            "edit_message" => Some(Self::EditMessage),
            "read_message" => Some(Self::ReadMessage),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SignUp => "sign_up",
            Self::Authenticate => "authenticate",
            Self::RefreshAccessToken => "refresh_access_token",
            Self::SearchUsers => "search_users",
            Self::GetChats => "get_chats",
            Self::NewMessage => "new_message",
            Self::GetMessages => "get_messages",
            Self::DeleteMessage => "delete_message",
            Self::EditMessage => "edit_message",
            Self::ReadMessage => "read_message",
        }
    }

    /// Capability bit checked by the dispatcher before the handler runs.
    pub fn requires_auth(self) -> bool {
        !matches!(
            self,
            Self::Login | Self::SignUp | Self::Authenticate | Self::RefreshAccessToken
        )
    }
}

/// Action name of server-initiated presence pushes. The other push frames
/// (`new_message`, `edit_message`, `delete_message`, `read_message`) reuse
/// the request action names.
pub const STATUS_CHANGE: &str = "status_change";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_round_trip() {
        for action in [
            Action::Login,
            Action::SignUp,
            Action::Authenticate,
            Action::RefreshAccessToken,
            Action::SearchUsers,
            Action::GetChats,
            Action::NewMessage,
            Action::GetMessages,
            Action::DeleteMessage,
            Action::EditMessage,
            Action::ReadMessage,
        ] {
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
        assert_eq!(Action::from_name("drop_table"), None);
    }

    #[test]
    fn auth_actions_are_open() {
        assert!(!Action::Login.requires_auth());
        assert!(!Action::SignUp.requires_auth());
        assert!(!Action::Authenticate.requires_auth());
        assert!(!Action::RefreshAccessToken.requires_auth());
        assert!(Action::NewMessage.requires_auth());
        assert!(Action::GetChats.requires_auth());
    }

    #[test]
    fn envelope_without_data_decodes() {
        let env: Envelope = serde_json::from_str(r#"{"action":"get_chats"}"#).unwrap();
        assert_eq!(env.action, "get_chats");
        assert!(env.data.is_null());
    }
}

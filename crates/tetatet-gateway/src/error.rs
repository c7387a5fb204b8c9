use std::collections::HashMap;

use serde_json::{Value, json};
use thiserror::Error;

/// Handler failure taxonomy. Every variant maps to a `success: false` reply
/// for the acting connection; none of them are fatal to the connection, let
/// alone the process.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Missing or unusable request fields, keyed by field name.
    #[error("validation failed")]
    Validation(HashMap<String, String>),

    /// A referenced user/chat/message does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The actor exists but is not allowed to do this.
    #[error("{0}")]
    Forbidden(String),

    /// Protected action on an unauthenticated connection. Rendered with a
    /// fixed marker so clients can redirect to login.
    #[error("authentication required")]
    Unauthorized,

    /// Anything unexpected below us (storage, tokens). Logged server-side,
    /// masked towards the client.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ActionError {
    pub fn validation(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), message.to_string());
        Self::Validation(errors)
    }

    pub fn not_found(message: &str) -> Self {
        Self::NotFound(message.to_string())
    }

    pub fn forbidden(message: &str) -> Self {
        Self::Forbidden(message.to_string())
    }

    /// The `data` payload of the failure reply.
    pub fn to_data(&self) -> Value {
        match self {
            Self::Validation(errors) => json!(errors),
            Self::NotFound(message) | Self::Forbidden(message) => json!({ "message": message }),
            Self::Unauthorized => json!({
                "error": "unauthorized",
                "message": "authentication required",
            }),
            Self::Internal(_) => json!({ "message": "internal server error" }),
        }
    }
}

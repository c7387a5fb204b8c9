pub mod auth;
pub mod chat;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ActionError;

/// Decode the `data` half of an envelope into a typed request. Payload
/// structs default their required strings, so this only fails on outright
/// type mismatches, which read as validation errors.
pub(crate) fn parse<T: DeserializeOwned>(data: Value) -> Result<T, ActionError> {
    serde_json::from_value(data)
        .map_err(|e| ActionError::validation("message", &format!("invalid payload: {}", e)))
}

/// Run a storage closure off the async runtime so rusqlite calls never
/// pin a worker thread.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ActionError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ActionError::Internal(anyhow::anyhow!("blocking task join: {}", e)))?
        .map_err(ActionError::from)
}

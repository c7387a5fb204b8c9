use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use tetatet_db::Database;
use tetatet_types::events::ChatEvent;
use tetatet_types::wire::{Action, Envelope, Frame};

use crate::actions::{auth, chat};
use crate::error::ActionError;
use crate::fanout::Fanout;
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// What a handler produced: the reply payload, optionally a domain event
/// for the fanout engine, and whether a direct reply is sent at all.
pub struct ActionOutcome {
    pub data: Value,
    pub event: Option<ChatEvent>,
    pub reply: bool,
}

impl ActionOutcome {
    pub fn reply(data: Value) -> Self {
        Self {
            data,
            event: None,
            reply: true,
        }
    }

    pub fn with_event(mut self, event: ChatEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Decodes inbound envelopes, enforces the auth capability bit and routes
/// to the action handlers. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) store: Arc<Database>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) fanout: Arc<Fanout>,
    pub(crate) jwt_secret: Arc<str>,
}

impl Dispatcher {
    pub fn new(store: Arc<Database>, registry: Arc<ConnectionRegistry>, jwt_secret: &str) -> Self {
        let fanout = Arc::new(Fanout::new(registry.clone(), store.clone()));
        Self {
            store,
            registry,
            fanout,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one inbound frame. Envelopes that cannot be decoded and
    /// unknown action names are logged and dropped without an answer;
    /// everything else gets a success/failure reply unless the handler
    /// suppressed it.
    pub async fn handle_frame(&self, conn: &Arc<ConnectionHandle>, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "connection {} sent undecodable frame: {} -- raw: {}",
                    conn.id(),
                    e,
                    raw.get(..200).unwrap_or(raw)
                );
                return;
            }
        };

        let Some(action) = Action::from_name(&envelope.action) else {
            warn!(
                "connection {} requested unknown action '{}'",
                conn.id(),
                envelope.action
            );
            return;
        };

        match self.invoke(action, conn, envelope.data).await {
            Ok(outcome) => {
                if outcome.reply {
                    let frame = Frame::ok(action.name(), outcome.data).to_json();
                    if !conn.send(frame) {
                        debug!("reply to closed connection {} dropped", conn.id());
                    }
                }
                if let Some(event) = outcome.event {
                    self.fanout.dispatch(event).await;
                }
            }
            Err(err) => {
                if let ActionError::Internal(ref e) = err {
                    error!("{} failed on connection {}: {:#}", action.name(), conn.id(), e);
                } else {
                    debug!("{} rejected on connection {}: {}", action.name(), conn.id(), err);
                }
                let frame = Frame::err(action.name(), err.to_data()).to_json();
                if !conn.send(frame) {
                    debug!("reply to closed connection {} dropped", conn.id());
                }
            }
        }
    }

    async fn invoke(
        &self,
        action: Action,
        conn: &Arc<ConnectionHandle>,
        data: Value,
    ) -> Result<ActionOutcome, ActionError> {
        // Uniform capability check: no handler that requires auth ever sees
        // an unauthenticated caller, and no state is mutated first.
        if action.requires_auth() && !conn.is_authenticated() {
            return Err(ActionError::Unauthorized);
        }

        match action {
            Action::Login => auth::login(self, data).await,
            Action::SignUp => auth::sign_up(self, data).await,
            Action::Authenticate => auth::authenticate(self, conn, data).await,
            Action::RefreshAccessToken => auth::refresh_access_token(self, data).await,
            Action::SearchUsers => auth::search_users(self, data).await,
            Action::GetChats => chat::get_chats(self, authed(conn)?).await,
            Action::NewMessage => chat::new_message(self, authed(conn)?, data).await,
            Action::GetMessages => chat::get_messages(self, authed(conn)?, data).await,
            Action::DeleteMessage => chat::delete_message(self, authed(conn)?, data).await,
            Action::EditMessage => chat::edit_message(self, authed(conn)?, data).await,
            Action::ReadMessage => chat::read_message(self, authed(conn)?, data).await,
        }
    }

    /// Connection teardown: drop it from the registry and, if it was the
    /// user's last live connection, stamp + persist `last_seen` and notify
    /// their chat peers. Disconnect is not latency-critical.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let Some(user_id) = self.registry.unregister(conn_id).await else {
            return;
        };

        let now = Utc::now();
        let store = self.store.clone();
        let uid = user_id.to_string();
        let persisted = tokio::task::spawn_blocking(move || store.update_last_seen(&uid, now))
            .await
            .map_err(|e| anyhow::anyhow!("blocking task join: {}", e))
            .and_then(|r| r);
        if let Err(e) = persisted {
            error!("persisting last_seen for {} failed: {:#}", user_id, e);
        }

        // Another device may still hold the user online; only an actual
        // presence transition is broadcast.
        if !self.registry.is_online(user_id).await {
            self.fanout
                .dispatch(ChatEvent::StatusChange {
                    user_id,
                    online: false,
                    last_seen: now,
                })
                .await;
        }
    }
}

fn authed(conn: &ConnectionHandle) -> Result<Uuid, ActionError> {
    conn.user_id().ok_or(ActionError::Unauthorized)
}

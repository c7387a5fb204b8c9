use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use tetatet_db::Database;
use tetatet_types::events::ChatEvent;
use tetatet_types::wire::Frame;

use crate::registry::ConnectionRegistry;
use crate::views;

/// Transient fanout record: one state-changing event plus the user ids
/// that must observe it. Materialized per event and consumed immediately;
/// never persisted and never delivered back to the actor.
#[derive(Debug)]
pub struct Update {
    pub recipients: Vec<Uuid>,
    pub event: ChatEvent,
    pub created_at: DateTime<Utc>,
}

/// Turns action outcomes into deliveries. Holds the registry and store by
/// reference — injected at construction, no process globals.
pub struct Fanout {
    registry: Arc<ConnectionRegistry>,
    store: Arc<Database>,
}

impl Fanout {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<Database>) -> Self {
        Self { registry, store }
    }

    /// Compute recipients, materialize the update and deliver it. All
    /// failure modes end here: fanout never propagates errors back into
    /// the acting connection's request.
    pub async fn dispatch(&self, event: ChatEvent) {
        let recipients = match self.recipients_for(&event).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!("fanout recipient resolution failed: {:#}", e);
                return;
            }
        };

        let update = Update {
            recipients,
            event,
            created_at: Utc::now(),
        };
        self.deliver(update).await;
    }

    async fn recipients_for(&self, event: &ChatEvent) -> Result<Vec<Uuid>> {
        match event {
            ChatEvent::NewMessage { chat, message } => {
                Ok(chat.peer_of(message.sender_id).into_iter().collect())
            }
            ChatEvent::MessageEdited { chat, actor, .. }
            | ChatEvent::MessageDeleted { chat, actor, .. } => {
                Ok(chat.peer_of(*actor).into_iter().collect())
            }
            ChatEvent::MessagesRead { reader, receipts } => {
                // One peer per touched chat, deduplicated across the batch.
                let mut seen = HashSet::new();
                Ok(receipts
                    .iter()
                    .filter_map(|r| r.chat.peer_of(*reader))
                    .filter(|peer| seen.insert(*peer))
                    .collect())
            }
            ChatEvent::StatusChange { user_id, .. } => {
                // Every chat peer of the affected user. Loading the full
                // chat list is fine here: presence changes are not on the
                // request hot path.
                let store = self.store.clone();
                let uid = user_id.to_string();
                let chats = tokio::task::spawn_blocking(move || store.chats_for_user(&uid))
                    .await
                    .map_err(|e| anyhow!("blocking task join: {}", e))??;

                let me = *user_id;
                let mut seen = HashSet::new();
                Ok(chats
                    .iter()
                    .filter_map(|c| views::chat_ref(c).peer_of(me))
                    .filter(|peer| seen.insert(*peer))
                    .collect())
            }
        }
    }

    /// Best-effort delivery to every live connection of every recipient.
    /// A dead connection is dropped and unregistered; the rest of the
    /// recipient set is unaffected.
    async fn deliver(&self, update: Update) {
        for recipient in &update.recipients {
            let frame = match self.render(&update.event, *recipient).await {
                Ok(Some(frame)) => frame.to_json(),
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        "rendering {} for {} failed: {:#}",
                        update.event.action(),
                        recipient,
                        e
                    );
                    continue;
                }
            };

            let connections = self.registry.find_live(*recipient).await;
            if connections.is_empty() {
                // Offline peer: the durable row is the only trace, the
                // client catches up on its next fetch.
                debug!("{} has no live connections, skipping", recipient);
                continue;
            }

            for conn in connections {
                if !conn.send(frame.clone()) {
                    warn!("send to {} failed, unregistering {}", recipient, conn.id());
                    self.registry.unregister(conn.id()).await;
                }
            }
        }
    }

    /// Build the push frame as seen by `viewer`. Always recomputed per
    /// recipient: `is_mine` and the embedded chat peer depend on who is
    /// looking.
    async fn render(&self, event: &ChatEvent, viewer: Uuid) -> Result<Option<Frame>> {
        match event {
            ChatEvent::NewMessage { chat, message } => {
                let Some(peer) = chat.peer_of(viewer) else {
                    return Ok(None);
                };

                let store = self.store.clone();
                let peer_id = peer.to_string();
                let peer_row = tokio::task::spawn_blocking(move || store.get_user_by_id(&peer_id))
                    .await
                    .map_err(|e| anyhow!("blocking task join: {}", e))??
                    .ok_or_else(|| anyhow!("chat participant {} missing from storage", peer))?;

                let is_online = self.registry.is_online(peer).await;
                let data = json!({
                    "chat": {
                        "id": chat.id,
                        "user": views::peer_view(&peer_row, is_online),
                    },
                    "message": message.view_for(viewer),
                });
                Ok(Some(Frame::ok(event.action(), data)))
            }

            ChatEvent::MessageEdited {
                chat,
                message_id,
                text,
                ..
            } => Ok(Some(Frame::ok(
                event.action(),
                json!({ "chat_id": chat.id, "message_id": message_id, "text": text }),
            ))),

            ChatEvent::MessageDeleted {
                chat, message_id, ..
            } => Ok(Some(Frame::ok(
                event.action(),
                json!({ "chat_id": chat.id, "message_id": message_id }),
            ))),

            ChatEvent::MessagesRead { reader, receipts } => {
                // The unique-pair invariant means at most one receipt can
                // involve this viewer.
                let Some(receipt) = receipts.iter().find(|r| r.chat.contains(viewer)) else {
                    return Ok(None);
                };
                Ok(Some(Frame::ok(
                    event.action(),
                    json!({
                        "chat_id": receipt.chat.id,
                        "message_ids": receipt.message_ids,
                        "user_id": reader,
                    }),
                )))
            }

            ChatEvent::StatusChange {
                user_id,
                online,
                last_seen,
            } => Ok(Some(Frame::ok(
                event.action(),
                json!({
                    "user_id": user_id,
                    "status": if *online { "online" } else { "offline" },
                    "last_seen": last_seen,
                }),
            ))),
        }
    }
}

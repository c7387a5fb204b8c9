use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use tetatet_db::models::ChatRow;
use tetatet_types::api::{
    DeleteMessageRequest, EditMessageRequest, GetMessagesRequest, NewMessageRequest,
    ReadMessageRequest,
};
use tetatet_types::events::{ChatEvent, ChatRef, ReadReceipt};
use tetatet_types::models::{ChatPreview, MessageBody, MessageStatus, ReplyView};

use crate::actions::{blocking, parse};
use crate::dispatcher::{ActionOutcome, Dispatcher};
use crate::error::ActionError;
use crate::views;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Resolve the chat a request addresses: directly by id (the actor must be
/// a participant) or laterally by peer user id, creating the chat on first
/// contact. The storage-level unique pair index makes concurrent creation
/// collapse onto one row.
async fn resolve_chat(
    d: &Dispatcher,
    actor: Uuid,
    chat_id: Option<Uuid>,
    user_id: Option<Uuid>,
) -> Result<ChatRow, ActionError> {
    if let Some(chat_id) = chat_id {
        let store = d.store.clone();
        let row = blocking(move || store.get_chat(&chat_id.to_string()))
            .await?
            .ok_or_else(|| ActionError::not_found("Chat not found"))?;

        if !views::chat_ref(&row).contains(actor) {
            return Err(ActionError::forbidden(
                "You are not a participant of this chat",
            ));
        }
        return Ok(row);
    }

    let Some(peer_id) = user_id else {
        return Err(ActionError::validation(
            "chat_id",
            "Either chat_id or user_id is required",
        ));
    };
    if peer_id == actor {
        return Err(ActionError::validation(
            "user_id",
            "Cannot start a chat with yourself",
        ));
    }

    let store = d.store.clone();
    let pid = peer_id.to_string();
    blocking(move || store.get_user_by_id(&pid))
        .await?
        .ok_or_else(|| ActionError::not_found("User not found"))?;

    let store = d.store.clone();
    blocking(move || store.get_or_create_chat(&actor.to_string(), &peer_id.to_string())).await
}

pub async fn new_message(
    d: &Dispatcher,
    actor: Uuid,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: NewMessageRequest = parse(data)?;
    if req.text.is_empty() {
        return Err(ActionError::validation("text", "Message cannot be empty"));
    }

    let chat = resolve_chat(d, actor, req.chat_id, req.user_id).await?;
    let chat_ref = views::chat_ref(&chat);
    let peer = chat_ref
        .peer_of(actor)
        .ok_or_else(|| ActionError::forbidden("You are not a participant of this chat"))?;

    // Reply targets are looked up in the addressed chat only; anything a
    // reply could point at necessarily already exists.
    let reply_view = match req.reply_to {
        Some(target_id) => {
            let store = d.store.clone();
            let target = blocking(move || store.get_message(target_id))
                .await?
                .filter(|m| m.chat_id == chat.id)
                .ok_or_else(|| {
                    ActionError::validation("reply_to", "Reply target not found in this chat")
                })?;
            Some(ReplyView {
                id: target.id,
                text: Some(target.text),
            })
        }
        None => None,
    };

    let now = Utc::now();
    let store = d.store.clone();
    let chat_id = chat.id.clone();
    let text = req.text.clone();
    let message_id = blocking(move || {
        store.insert_message(&chat_id, &actor.to_string(), &text, req.reply_to, now)
    })
    .await?;

    let message = MessageBody {
        id: message_id,
        chat_id: chat_ref.id,
        sender_id: actor,
        text: req.text,
        status: MessageStatus::Sent,
        reply_to: reply_view,
        created_at: now,
    };

    // The sender's confirmation embeds the peer from the sender's point of
    // view; the push the fanout builds for the peer embeds the sender.
    let store = d.store.clone();
    let pid = peer.to_string();
    let peer_row = blocking(move || store.get_user_by_id(&pid))
        .await?
        .ok_or_else(|| ActionError::not_found("User not found"))?;
    let peer_online = d.registry.is_online(peer).await;

    let data = json!({
        "chat": {
            "id": chat_ref.id,
            "user": views::peer_view(&peer_row, peer_online),
        },
        "message": message.view_for(actor),
    });

    Ok(ActionOutcome::reply(data).with_event(ChatEvent::NewMessage {
        chat: chat_ref,
        message,
    }))
}

pub async fn get_chats(d: &Dispatcher, actor: Uuid) -> Result<ActionOutcome, ActionError> {
    let store = d.store.clone();
    let uid = actor.to_string();
    let rows = blocking(move || {
        let chats = store.chats_for_user(&uid)?;
        let mut out = Vec::with_capacity(chats.len());
        for chat in chats {
            let peer_id = if chat.user_lo == uid {
                chat.user_hi.clone()
            } else {
                chat.user_lo.clone()
            };
            let peer = store.get_user_by_id(&peer_id)?;
            let unread = store.unread_count(&chat.id, &uid)?;
            out.push((chat, peer, unread));
        }
        Ok(out)
    })
    .await?;

    let mut results: Vec<ChatPreview> = Vec::with_capacity(rows.len());
    for (chat, peer, unread) in rows {
        let Some(peer) = peer else {
            warn!("chat {} references a missing participant", chat.id);
            continue;
        };
        let peer_uuid = views::parse_uuid(&peer.id);
        let is_online = d.registry.is_online(peer_uuid).await;
        results.push(ChatPreview {
            id: views::parse_uuid(&chat.id),
            user: views::peer_view(&peer, is_online),
            last_message: chat.last_message,
            updated_at: views::parse_ts(&chat.updated_at),
            unread,
        });
    }

    Ok(ActionOutcome::reply(json!({ "results": results })))
}

pub async fn get_messages(
    d: &Dispatcher,
    actor: Uuid,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: GetMessagesRequest = parse(data)?;
    let chat = resolve_chat(d, actor, req.chat_id, req.user_id).await?;
    let page_size = req
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let store = d.store.clone();
    let chat_id = chat.id.clone();
    let (rows, has_more) =
        blocking(move || store.page_messages(&chat_id, page_size, req.last_message)).await?;

    let results: Vec<_> = rows
        .iter()
        .map(|row| views::message_body(row).view_for(actor))
        .collect();

    Ok(ActionOutcome::reply(json!({
        "chat_id": views::parse_uuid(&chat.id),
        "results": results,
        "has_more": has_more,
    })))
}

pub async fn edit_message(
    d: &Dispatcher,
    actor: Uuid,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: EditMessageRequest = parse(data)?;
    let Some(message_id) = req.message_id else {
        return Err(ActionError::validation("message_id", "Message id is required"));
    };
    if req.text.is_empty() {
        return Err(ActionError::validation("text", "Message cannot be empty"));
    }

    let (row, chat_ref) = owned_message(d, actor, message_id, "edit").await?;

    let store = d.store.clone();
    let text = req.text.clone();
    if !blocking(move || store.update_message_text(message_id, &text)).await? {
        return Err(ActionError::not_found("Message not found"));
    }

    let data = json!({
        "chat_id": chat_ref.id,
        "message_id": row.id,
        "text": req.text.clone(),
    });
    Ok(ActionOutcome::reply(data).with_event(ChatEvent::MessageEdited {
        chat: chat_ref,
        actor,
        message_id: row.id,
        text: req.text,
    }))
}

pub async fn delete_message(
    d: &Dispatcher,
    actor: Uuid,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: DeleteMessageRequest = parse(data)?;
    let Some(message_id) = req.message_id else {
        return Err(ActionError::validation("message_id", "Message id is required"));
    };

    let (row, chat_ref) = owned_message(d, actor, message_id, "delete").await?;

    let store = d.store.clone();
    if !blocking(move || store.delete_message(message_id)).await? {
        return Err(ActionError::not_found("Message not found"));
    }

    let data = json!({
        "chat_id": chat_ref.id,
        "message_id": row.id,
    });
    Ok(ActionOutcome::reply(data).with_event(ChatEvent::MessageDeleted {
        chat: chat_ref,
        actor,
        message_id: row.id,
    }))
}

/// Fetch a message and enforce sender ownership before any mutation.
async fn owned_message(
    d: &Dispatcher,
    actor: Uuid,
    message_id: i64,
    verb: &str,
) -> Result<(tetatet_db::models::MessageRow, ChatRef), ActionError> {
    let store = d.store.clone();
    let row = blocking(move || store.get_message(message_id))
        .await?
        .ok_or_else(|| ActionError::not_found("Message not found"))?;

    if views::parse_uuid(&row.sender_id) != actor {
        return Err(ActionError::Forbidden(format!(
            "You can only {} your own messages",
            verb
        )));
    }

    let store = d.store.clone();
    let chat_id = row.chat_id.clone();
    let chat = blocking(move || store.get_chat(&chat_id))
        .await?
        .ok_or_else(|| ActionError::not_found("Chat not found"))?;

    Ok((row, views::chat_ref(&chat)))
}

pub async fn read_message(
    d: &Dispatcher,
    actor: Uuid,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: ReadMessageRequest = parse(data)?;
    let ids = req.ids();
    if ids.is_empty() {
        return Err(ActionError::validation(
            "message_ids",
            "At least one message id is required",
        ));
    }

    let store = d.store.clone();
    let actor_key = actor.to_string();
    let (changed, rows) = blocking(move || {
        // Ids that don't resolve, or that live in chats the actor is not
        // part of, are skipped without failing the batch.
        let rows: Vec<_> = store
            .resolve_receipts(&ids)?
            .into_iter()
            .filter(|r| r.user_lo == actor_key || r.user_hi == actor_key)
            .collect();
        let eligible: Vec<i64> = rows.iter().map(|r| r.message_id).collect();
        let changed = store.mark_read(&eligible)?;
        Ok((changed, rows))
    })
    .await?;

    // A batch that changed nothing emits nothing.
    if changed == 0 {
        return Ok(ActionOutcome::reply(json!({ "updated": 0 })));
    }

    let mut by_chat: HashMap<String, ReadReceipt> = HashMap::new();
    for row in rows {
        by_chat
            .entry(row.chat_id.clone())
            .or_insert_with(|| ReadReceipt {
                chat: ChatRef {
                    id: views::parse_uuid(&row.chat_id),
                    user_lo: views::parse_uuid(&row.user_lo),
                    user_hi: views::parse_uuid(&row.user_hi),
                },
                message_ids: Vec::new(),
            })
            .message_ids
            .push(row.message_id);
    }

    let receipts: Vec<ReadReceipt> = by_chat.into_values().collect();
    Ok(
        ActionOutcome::reply(json!({ "updated": changed })).with_event(ChatEvent::MessagesRead {
            reader: actor,
            receipts,
        }),
    )
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use tetatet_auth::{hash_password, issue_pair, refresh_access, verify_access, verify_password};
use tetatet_types::api::{
    AuthenticateRequest, LoginRequest, RefreshRequest, SearchUsersRequest, SignUpRequest,
};
use tetatet_types::events::ChatEvent;

use crate::actions::{blocking, parse};
use crate::dispatcher::{ActionOutcome, Dispatcher};
use crate::error::ActionError;
use crate::registry::ConnectionHandle;
use crate::views;

const SEARCH_LIMIT: u32 = 10;

pub async fn login(d: &Dispatcher, data: Value) -> Result<ActionOutcome, ActionError> {
    let req: LoginRequest = parse(data)?;

    let mut errors = HashMap::new();
    if req.username.is_empty() {
        errors.insert("username".to_string(), "Username cannot be empty".to_string());
    }
    if req.password.is_empty() {
        errors.insert("password".to_string(), "Password cannot be empty".to_string());
    }
    if !errors.is_empty() {
        return Err(ActionError::Validation(errors));
    }

    let store = d.store.clone();
    let username = req.username.clone();
    let user = blocking(move || store.get_user_by_username(&username))
        .await?
        .ok_or_else(|| ActionError::not_found("User not found"))?;

    if !verify_password(&req.password, &user.password) {
        return Err(ActionError::forbidden("Username or password is invalid"));
    }

    let pair = issue_pair(views::parse_uuid(&user.id), &d.jwt_secret)?;
    Ok(ActionOutcome::reply(json!(pair)))
}

pub async fn sign_up(d: &Dispatcher, data: Value) -> Result<ActionOutcome, ActionError> {
    let req: SignUpRequest = parse(data)?;

    let mut errors = HashMap::new();
    if req.username.is_empty() {
        errors.insert("username".to_string(), "Username cannot be empty".to_string());
    }
    if req.password.is_empty() {
        errors.insert("password".to_string(), "Password cannot be empty".to_string());
    }
    if req.email.is_empty() {
        errors.insert("email".to_string(), "Email cannot be empty".to_string());
    }
    if !errors.is_empty() {
        return Err(ActionError::Validation(errors));
    }

    let store = d.store.clone();
    let (username, email) = (req.username.clone(), req.email.clone());
    let (name_taken, email_taken) =
        blocking(move || store.user_exists(&username, &email)).await?;

    if name_taken {
        errors.insert(
            "username".to_string(),
            "User with this username already exists".to_string(),
        );
    }
    if email_taken {
        errors.insert(
            "email".to_string(),
            "User with this email already exists".to_string(),
        );
    }
    if !errors.is_empty() {
        return Err(ActionError::Validation(errors));
    }

    let user_id = Uuid::new_v4();
    let password_hash = hash_password(&req.password)?;

    let store = d.store.clone();
    blocking(move || {
        store.create_user(
            &user_id.to_string(),
            &req.username,
            &req.email,
            &password_hash,
            req.full_name.as_deref(),
        )
    })
    .await?;

    info!("user {} signed up", user_id);

    let pair = issue_pair(user_id, &d.jwt_secret)?;
    Ok(ActionOutcome::reply(json!(pair)))
}

/// Bind this connection to the token's user. The first live connection of
/// a user flips their presence to online, which is fanned out to every
/// chat peer.
pub async fn authenticate(
    d: &Dispatcher,
    conn: &Arc<ConnectionHandle>,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: AuthenticateRequest = parse(data)?;
    if req.access_token.is_empty() {
        return Err(ActionError::validation(
            "access_token",
            "Access token cannot be empty",
        ));
    }

    let Some(claims) = verify_access(&req.access_token, &d.jwt_secret) else {
        return Err(ActionError::forbidden("Access token is not valid"));
    };
    let user_id = claims.sub;

    let store = d.store.clone();
    let uid = user_id.to_string();
    let user = blocking(move || store.get_user_by_id(&uid))
        .await?
        .ok_or_else(|| ActionError::not_found("User not found"))?;

    let was_online = d.registry.is_online(user_id).await;
    d.registry.bind_user(conn.id(), user_id).await;

    let now = Utc::now();
    let store = d.store.clone();
    let uid = user_id.to_string();
    blocking(move || store.update_last_seen(&uid, now)).await?;

    info!("connection {} authenticated as {}", conn.id(), user_id);

    let mut outcome = ActionOutcome::reply(json!({
        "message": "authenticated",
        "user": views::user_view(&user),
    }));
    if !was_online {
        outcome = outcome.with_event(ChatEvent::StatusChange {
            user_id,
            online: true,
            last_seen: now,
        });
    }
    Ok(outcome)
}

pub async fn refresh_access_token(
    d: &Dispatcher,
    data: Value,
) -> Result<ActionOutcome, ActionError> {
    let req: RefreshRequest = parse(data)?;
    if req.refresh_token.is_empty() {
        return Err(ActionError::validation(
            "refresh_token",
            "Refresh token cannot be empty",
        ));
    }

    match refresh_access(&req.refresh_token, &d.jwt_secret) {
        Some(access_token) => Ok(ActionOutcome::reply(json!({ "access_token": access_token }))),
        None => Err(ActionError::forbidden("Refresh token is invalid")),
    }
}

pub async fn search_users(d: &Dispatcher, data: Value) -> Result<ActionOutcome, ActionError> {
    let req: SearchUsersRequest = parse(data)?;
    let q = match req.q {
        Some(q) if !q.is_empty() => q,
        _ => return Err(ActionError::validation("q", "Query cannot be empty")),
    };

    let store = d.store.clone();
    let rows = blocking(move || store.search_users(&q, SEARCH_LIMIT)).await?;
    let results: Vec<_> = rows.iter().map(views::user_view).collect();
    Ok(ActionOutcome::reply(json!({ "results": results })))
}

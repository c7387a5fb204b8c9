//! End-to-end tests for the dispatcher + registry + fanout core, driven
//! over in-memory connection handles and an in-memory database. No sockets:
//! a connection is its outbound frame channel.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use tetatet_db::Database;
use tetatet_gateway::dispatcher::Dispatcher;
use tetatet_gateway::registry::{ConnectionHandle, ConnectionRegistry};

const SECRET: &str = "test-secret";

struct TestClient {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::UnboundedReceiver<String>,
    access: String,
}

impl TestClient {
    /// Next queued frame. Frames are queued synchronously by the time
    /// `handle_frame` returns, so no waiting is involved.
    fn recv(&mut self) -> Value {
        let raw = self.rx.try_recv().expect("expected a frame");
        serde_json::from_str(&raw).expect("frame is valid json")
    }

    fn try_recv(&mut self) -> Option<Value> {
        self.rx
            .try_recv()
            .ok()
            .map(|raw| serde_json::from_str(&raw).expect("frame is valid json"))
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

fn setup() -> Dispatcher {
    let store = Arc::new(Database::open_in_memory().expect("in-memory db"));
    let registry = Arc::new(ConnectionRegistry::new());
    Dispatcher::new(store, registry, SECRET)
}

async fn connect(d: &Dispatcher) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);
    d.registry().register(handle.clone()).await;
    TestClient {
        handle,
        rx,
        access: String::new(),
    }
}

async fn send(d: &Dispatcher, client: &TestClient, action: &str, data: Value) {
    let frame = json!({ "action": action, "data": data }).to_string();
    d.handle_frame(&client.handle, &frame).await;
}

/// Sign up a fresh user on this connection and authenticate it.
/// Returns the user id.
async fn sign_up_and_auth(d: &Dispatcher, client: &mut TestClient, username: &str) -> Uuid {
    send(
        d,
        client,
        "sign_up",
        json!({
            "username": username,
            "password": "password123",
            "email": format!("{username}@example.com"),
        }),
    )
    .await;
    let reply = client.recv();
    assert_eq!(reply["success"], true, "sign_up failed: {reply}");
    client.access = reply["data"]["access"].as_str().expect("access token").to_string();

    authenticate(d, client).await
}

async fn authenticate(d: &Dispatcher, client: &mut TestClient) -> Uuid {
    let token = client.access.clone();
    send(d, client, "authenticate", json!({ "access_token": token })).await;
    let reply = client.recv();
    assert_eq!(reply["success"], true, "authenticate failed: {reply}");
    reply["data"]["user"]["id"]
        .as_str()
        .expect("user id")
        .parse()
        .expect("user id is a uuid")
}

#[tokio::test]
async fn first_message_creates_chat_and_delivers_live() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "hi" })).await;

    // Sender confirmation: new chat id, own copy tagged is_mine=true.
    let reply = a.recv();
    assert_eq!(reply["action"], "new_message");
    assert_eq!(reply["success"], true);
    assert!(reply["data"]["chat"]["id"].is_string());
    assert_eq!(reply["data"]["message"]["text"], "hi");
    assert_eq!(reply["data"]["message"]["is_mine"], true);
    assert_eq!(reply["data"]["chat"]["user"]["username"], "bob");

    // Peer push: same message, recomputed framing.
    let push = b.recv();
    assert_eq!(push["action"], "new_message");
    assert_eq!(push["success"], true);
    assert_eq!(push["data"]["message"]["text"], "hi");
    assert_eq!(push["data"]["message"]["is_mine"], false);
    assert_eq!(push["data"]["chat"]["user"]["username"], "alice");
    assert_eq!(push["data"]["chat"]["id"], reply["data"]["chat"]["id"]);

    // Exactly one push.
    assert!(b.try_recv().is_none());
}

#[tokio::test]
async fn offline_peer_misses_delivery_but_not_history() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    // Bob goes away.
    d.disconnect(b.handle.id()).await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "you there?" })).await;
    let reply = a.recv();
    assert_eq!(reply["success"], true);

    // No live delivery happened anywhere for bob.
    assert!(b.try_recv().is_none());

    // Bob reconnects; alice is notified, bob catches up via history.
    let mut b2 = connect(&d).await;
    b2.access = b.access.clone();
    authenticate(&d, &mut b2).await;

    let status = a.recv();
    assert_eq!(status["action"], "status_change");
    assert_eq!(status["data"]["status"], "online");

    send(&d, &b2, "get_messages", json!({ "chat_id": reply["data"]["chat"]["id"] })).await;
    let history = b2.recv();
    assert_eq!(history["success"], true);
    let results = history["data"]["results"].as_array().expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "you there?");
    assert_eq!(results[0]["is_mine"], false);
    assert_eq!(history["data"]["has_more"], false);
}

#[tokio::test]
async fn every_live_device_of_the_peer_is_reached() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b_phone = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b_phone, "bob").await;

    // Second device, same account.
    let mut b_laptop = connect(&d).await;
    b_laptop.access = b_phone.access.clone();
    authenticate(&d, &mut b_laptop).await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "ping" })).await;
    a.drain();

    for device in [&mut b_phone, &mut b_laptop] {
        let push = device.recv();
        assert_eq!(push["action"], "new_message");
        assert_eq!(push["data"]["message"]["is_mine"], false);
        assert_eq!(push["data"]["message"]["text"], "ping");
    }
}

#[tokio::test]
async fn unauthenticated_protected_action_is_rejected() {
    let d = setup();
    let mut anon = connect(&d).await;

    send(&d, &anon, "get_chats", json!({})).await;
    let reply = anon.recv();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["data"]["error"], "unauthorized");

    send(&d, &anon, "new_message", json!({ "user_id": Uuid::new_v4(), "text": "x" })).await;
    let reply = anon.recv();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["data"]["error"], "unauthorized");
}

#[tokio::test]
async fn garbage_and_unknown_actions_are_dropped_quietly() {
    let d = setup();
    let mut client = connect(&d).await;

    d.handle_frame(&client.handle, "this is not json").await;
    assert!(client.try_recv().is_none());

    send(&d, &client, "make_coffee", json!({})).await;
    assert!(client.try_recv().is_none());

    // The connection still works afterwards.
    sign_up_and_auth(&d, &mut client, "survivor").await;
    send(&d, &client, "get_chats", json!({})).await;
    let reply = client.recv();
    assert_eq!(reply["success"], true);
}

#[tokio::test]
async fn validation_errors_are_field_keyed() {
    let d = setup();
    let mut client = connect(&d).await;

    send(&d, &client, "login", json!({})).await;
    let reply = client.recv();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["data"]["username"], "Username cannot be empty");
    assert_eq!(reply["data"]["password"], "Password cannot be empty");
}

#[tokio::test]
async fn login_returns_a_working_token_pair() {
    let d = setup();
    let mut client = connect(&d).await;
    sign_up_and_auth(&d, &mut client, "alice").await;

    let mut again = connect(&d).await;
    send(
        &d,
        &again,
        "login",
        json!({ "username": "alice", "password": "password123" }),
    )
    .await;
    let reply = again.recv();
    assert_eq!(reply["success"], true);
    assert!(reply["data"]["access"].is_string());

    // The refresh token mints a new usable access token.
    let refresh = reply["data"]["refresh"].as_str().expect("refresh token");
    send(
        &d,
        &again,
        "refresh_access_token",
        json!({ "refresh_token": refresh }),
    )
    .await;
    let reply = again.recv();
    assert_eq!(reply["success"], true);
    again.access = reply["data"]["access_token"].as_str().expect("token").to_string();
    authenticate(&d, &mut again).await;

    // Wrong password path.
    let mut wrong = connect(&d).await;
    send(
        &d,
        &wrong,
        "login",
        json!({ "username": "alice", "password": "letmein!" }),
    )
    .await;
    let reply = wrong.recv();
    assert_eq!(reply["success"], false);
    assert!(reply["data"]["message"].is_string());
}

#[tokio::test]
async fn search_users_matches_substrings() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    sign_up_and_auth(&d, &mut b, "malice").await;

    send(&d, &a, "search_users", json!({ "q": "ALIC" })).await;
    let reply = a.recv();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["results"].as_array().expect("results").len(), 2);
}

#[tokio::test]
async fn get_chats_reports_live_presence_and_unread() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    let a_id = sign_up_and_auth(&d, &mut a, "alice").await;
    sign_up_and_auth(&d, &mut b, "bob").await;

    send(&d, &b, "new_message", json!({ "user_id": a_id, "text": "hey" })).await;
    b.drain();
    a.drain();

    send(&d, &a, "get_chats", json!({})).await;
    let reply = a.recv();
    let results = reply["data"]["results"].as_array().expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["user"]["username"], "bob");
    assert_eq!(results[0]["user"]["is_online"], true);
    assert_eq!(results[0]["last_message"], "hey");
    assert_eq!(results[0]["unread"], 1);

    // Bob drops off; presence flips, nothing else changes.
    d.disconnect(b.handle.id()).await;
    a.drain();
    send(&d, &a, "get_chats", json!({})).await;
    let reply = a.recv();
    assert_eq!(reply["data"]["results"][0]["user"]["is_online"], false);
}

#[tokio::test]
async fn pagination_follows_the_cursor_without_gaps() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    for i in 0..25 {
        send(&d, &a, "new_message", json!({ "user_id": b_id, "text": format!("msg {i}") })).await;
    }
    a.drain();
    b.drain();

    send(&d, &b, "get_messages", json!({ "user_id": a.handle.user_id().expect("authed") })).await;
    let page1 = b.recv();
    assert_eq!(page1["success"], true);
    let results = page1["data"]["results"].as_array().expect("results");
    assert_eq!(results.len(), 20);
    assert_eq!(page1["data"]["has_more"], true);
    assert_eq!(results[0]["text"], "msg 5");
    assert_eq!(results[19]["text"], "msg 24");

    let cursor = results[0]["id"].as_i64().expect("message id");
    send(
        &d,
        &b,
        "get_messages",
        json!({ "chat_id": page1["data"]["chat_id"], "last_message": cursor }),
    )
    .await;
    let page2 = b.recv();
    let older = page2["data"]["results"].as_array().expect("results");
    assert_eq!(older.len(), 5);
    assert_eq!(page2["data"]["has_more"], false);
    assert_eq!(older[0]["text"], "msg 0");
    assert_eq!(older[4]["text"], "msg 4");
}

#[tokio::test]
async fn read_receipts_are_batched_and_deduplicated() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    let mut c = connect(&d).await;
    let a_id = sign_up_and_auth(&d, &mut a, "alice").await;
    sign_up_and_auth(&d, &mut b, "bob").await;
    sign_up_and_auth(&d, &mut c, "carol").await;

    // Bob and Carol each message Alice in their own chat.
    send(&d, &b, "new_message", json!({ "user_id": a_id, "text": "from bob" })).await;
    send(&d, &c, "new_message", json!({ "user_id": a_id, "text": "from carol" })).await;
    b.drain();
    c.drain();

    let m1 = a.recv()["data"]["message"]["id"].as_i64().expect("id");
    let m2 = a.recv()["data"]["message"]["id"].as_i64().expect("id");

    send(&d, &a, "read_message", json!({ "message_ids": [m1, m2] })).await;
    let reply = a.recv();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["updated"], 2);

    // Exactly one receipt per peer, tagged with the reader.
    for (peer, mid) in [(&mut b, m1), (&mut c, m2)] {
        let push = peer.recv();
        assert_eq!(push["action"], "read_message");
        assert_eq!(push["data"]["message_ids"], json!([mid]));
        assert_eq!(push["data"]["user_id"], json!(a_id));
        assert!(peer.try_recv().is_none(), "duplicate receipt delivered");
    }

    // Re-reading the same batch is a no-op and emits nothing.
    send(&d, &a, "read_message", json!({ "message_ids": [m1, m2] })).await;
    let reply = a.recv();
    assert_eq!(reply["data"]["updated"], 0);
    assert!(b.try_recv().is_none());
    assert!(c.try_recv().is_none());
}

#[tokio::test]
async fn only_the_sender_may_edit_or_delete() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "original" })).await;
    let reply = a.recv();
    let chat_id = reply["data"]["chat"]["id"].clone();
    let message_id = reply["data"]["message"]["id"].as_i64().expect("id");
    b.drain();

    // Bob is not the sender.
    send(&d, &b, "edit_message", json!({ "message_id": message_id, "text": "hacked" })).await;
    let reply = b.recv();
    assert_eq!(reply["success"], false);
    assert!(reply["data"]["message"].as_str().expect("message").contains("own"));

    send(&d, &b, "delete_message", json!({ "message_id": message_id })).await;
    let reply = b.recv();
    assert_eq!(reply["success"], false);

    // The message is untouched.
    send(&d, &b, "get_messages", json!({ "chat_id": chat_id })).await;
    let history = b.recv();
    assert_eq!(history["data"]["results"][0]["text"], "original");
}

#[tokio::test]
async fn edits_and_deletes_reach_the_live_peer() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "first" })).await;
    let first = a.recv()["data"]["message"]["id"].as_i64().expect("id");
    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "second" })).await;
    let second = a.recv()["data"]["message"]["id"].as_i64().expect("id");
    b.drain();

    send(&d, &a, "edit_message", json!({ "message_id": first, "text": "first, edited" })).await;
    let reply = a.recv();
    assert_eq!(reply["success"], true);

    let push = b.recv();
    assert_eq!(push["action"], "edit_message");
    assert_eq!(push["data"]["message_id"], json!(first));
    assert_eq!(push["data"]["text"], "first, edited");

    send(&d, &a, "delete_message", json!({ "message_id": second })).await;
    a.drain();

    let push = b.recv();
    assert_eq!(push["action"], "delete_message");
    assert_eq!(push["data"]["message_id"], json!(second));
}

#[tokio::test]
async fn reply_to_survives_deletion_of_its_target() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "delete me" })).await;
    let reply = a.recv();
    let chat_id = reply["data"]["chat"]["id"].clone();
    let target = reply["data"]["message"]["id"].as_i64().expect("id");
    b.drain();

    send(
        &d,
        &b,
        "new_message",
        json!({ "chat_id": chat_id, "text": "quoting you", "reply_to": target }),
    )
    .await;
    let reply = b.recv();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["message"]["reply_to"]["text"], "delete me");
    a.drain();

    send(&d, &a, "delete_message", json!({ "message_id": target })).await;
    a.drain();
    b.drain();

    // The reply's reference now resolves to nothing, without an error.
    send(&d, &b, "get_messages", json!({ "chat_id": chat_id })).await;
    let history = b.recv();
    assert_eq!(history["success"], true);
    let results = history["data"]["results"].as_array().expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "quoting you");
    assert_eq!(results[0]["reply_to"]["id"], json!(target));
    assert!(results[0]["reply_to"]["text"].is_null());

    // Replying to the deleted message is now rejected as validation.
    send(
        &d,
        &b,
        "new_message",
        json!({ "chat_id": chat_id, "text": "late quote", "reply_to": target }),
    )
    .await;
    let reply = b.recv();
    assert_eq!(reply["success"], false);
    assert!(reply["data"]["reply_to"].is_string());
}

#[tokio::test]
async fn disconnect_notifies_peers_once_all_devices_are_gone() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b_phone = connect(&d).await;
    sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b_phone, "bob").await;

    // Create the chat so alice is a presence peer of bob.
    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "hi" })).await;
    a.drain();
    b_phone.drain();

    let mut b_laptop = connect(&d).await;
    b_laptop.access = b_phone.access.clone();
    authenticate(&d, &mut b_laptop).await;
    // Bob was already online; the second device causes no transition.
    assert!(a.try_recv().is_none());

    d.disconnect(b_phone.handle.id()).await;
    // Still online on the laptop.
    assert!(a.try_recv().is_none());

    d.disconnect(b_laptop.handle.id()).await;
    let status = a.recv();
    assert_eq!(status["action"], "status_change");
    assert_eq!(status["data"]["user_id"], json!(b_id));
    assert_eq!(status["data"]["status"], "offline");
    assert!(status["data"]["last_seen"].is_string());
}

#[tokio::test]
async fn concurrent_first_messages_share_one_chat() {
    let d = setup();
    let mut a = connect(&d).await;
    let mut b = connect(&d).await;
    let a_id = sign_up_and_auth(&d, &mut a, "alice").await;
    let b_id = sign_up_and_auth(&d, &mut b, "bob").await;

    // Both sides open the conversation at once (separate connections run
    // in parallel; the unique pair index collapses the race).
    send(&d, &a, "new_message", json!({ "user_id": b_id, "text": "you first" })).await;
    send(&d, &b, "new_message", json!({ "user_id": a_id, "text": "no, you" })).await;

    let chat_a = a.recv()["data"]["chat"]["id"].clone();
    let chat_b = b.recv()["data"]["chat"]["id"].clone();
    assert_eq!(chat_a, chat_b);

    // Either side lists exactly one chat.
    a.drain();
    send(&d, &a, "get_chats", json!({})).await;
    let chats = a.recv();
    assert_eq!(chats["data"]["results"].as_array().expect("results").len(), 1);
}

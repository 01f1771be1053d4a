mod common;

use chat_api::{ChatView, Envelope, PublicUser};
use common::{image_part, spawn_server, PNG};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn start_chat_is_single_per_pair() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;

    let resp = srv.start_chat(&alice.access, bob.id).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Envelope = resp.json().await.unwrap();
    assert!(created.success);
    let chat: ChatView = created.chat_as().unwrap();
    assert_eq!(chat.views.len(), 2);
    assert_eq!(chat.last_message, "");
    assert_eq!(chat.last_message_sender_id, None);
    let mut pair = vec![alice.id, bob.id];
    pair.sort();
    let mut participants = chat.participants.clone();
    participants.sort();
    assert_eq!(participants, pair);

    for (token, peer) in [(&alice.access, bob.id), (&bob.access, alice.id)] {
        let resp = srv.start_chat(token, peer).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let existing: Envelope = resp.json().await.unwrap();
        assert!(!existing.success);
        assert_eq!(
            existing.message.as_deref(),
            Some("Chat already exists with this user")
        );
        let same: ChatView = existing.chat_as().unwrap();
        assert_eq!(same.id, chat.id);
        assert_eq!(same.message_id, chat.message_id);
    }

    srv.server.abort();
}

#[tokio::test]
async fn start_chat_validation() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;

    let resp = srv
        .post_json(&alice.access, "/chatapp/chats/start-chat", json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Receiver ID is required");

    let resp = srv.start_chat(&alice.access, alice.id).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv.start_chat(&alice.access, Uuid::new_v4()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    srv.server.abort();
}

#[tokio::test]
async fn seen_flags_follow_the_latest_message() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;
    srv.start_chat(&alice.access, bob.id).await;

    let resp = srv.send_text(&alice.access, bob.id, "hello").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let sent: Value = resp.json().await.unwrap();
    assert_eq!(sent["message"], "Message sent successfully");
    assert_eq!(sent["data"]["content"], "hello");
    assert_eq!(sent["chat"]["lastMessage"], "hello");

    let bob_rows = srv.friends(&bob.access).await;
    assert_eq!(bob_rows.len(), 1);
    assert_eq!(bob_rows[0]["_id"], alice.id.to_string());
    assert_eq!(bob_rows[0]["name"], "alice");
    assert_eq!(bob_rows[0]["lastMessage"], "hello");
    assert_eq!(bob_rows[0]["messageSeen"], false);

    let alice_rows = srv.friends(&alice.access).await;
    assert_eq!(alice_rows[0]["lastMessage"], "hello");
    assert_eq!(alice_rows[0]["messageSeen"], true);
    assert_eq!(alice_rows[0]["lastMessageSenderId"], alice.id.to_string());

    for _ in 0..2 {
        let resp = srv
            .post_json(
                &bob.access,
                "/chatapp/chats/toggle/last/seen/logged/user",
                json!({"friendId": alice.id}),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        let views = body["data"].as_array().unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v["messageSeen"] == true));
    }
    assert_eq!(srv.friends(&bob.access).await[0]["messageSeen"], true);

    srv.server.abort();
}

#[tokio::test]
async fn friend_list_orders_by_latest_activity() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;
    let carol = srv.session("carol").await;

    srv.start_chat(&alice.access, bob.id).await;
    srv.start_chat(&carol.access, alice.id).await;
    srv.send_text(&bob.access, alice.id, "first").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    srv.send_text(&carol.access, alice.id, "second").await;

    let rows = srv.friends(&alice.access).await;
    let ids: Vec<_> = rows.iter().map(|r| r["_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![carol.id.to_string(), bob.id.to_string()]);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    srv.send_text(&alice.access, bob.id, "third").await;
    let rows = srv.friends(&alice.access).await;
    assert_eq!(rows[0]["_id"], bob.id.to_string());
    assert_eq!(rows[0]["lastMessage"], "third");
    assert_eq!(rows.len(), 2);

    srv.server.abort();
}

#[tokio::test]
async fn thread_and_last_message() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;
    srv.start_chat(&alice.access, bob.id).await;
    srv.send_text(&alice.access, bob.id, "hi bob").await;
    srv.send_text(&bob.access, alice.id, "hi alice").await;

    let resp = srv
        .get(
            &alice.access,
            &format!("/chatapp/chats/message-by-current-chat-user?_id={}", bob.id),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "hi bob");
    assert_eq!(messages[0]["senderId"], alice.id.to_string());
    assert_eq!(messages[1]["content"], "hi alice");

    let resp = srv
        .get(
            &alice.access,
            &format!("/chatapp/chats/last-message?_id={}", bob.id),
        )
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["lastData"], "hi alice");
    let clock = body["data"]["timeUpdate"].as_str().unwrap();
    assert!(clock.ends_with(" am") || clock.ends_with(" pm"));

    let resp = srv
        .get(
            &alice.access,
            &format!("/chatapp/chats/friend-data-with-loggedin-user-profile?_id={}", bob.id),
        )
        .await;
    let body: Envelope = resp.json().await.unwrap();
    let friend: PublicUser = body.user_as().unwrap();
    assert_eq!(friend.id, bob.id);
    assert_eq!(friend.username, "bob");
    assert!(body.user.unwrap().get("passwordHash").is_none());

    srv.server.abort();
}

#[tokio::test]
async fn send_message_validation() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;

    let resp = srv.send_text(&alice.access, bob.id, "too early").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    srv.start_chat(&alice.access, bob.id).await;
    let resp = srv.send_text(&alice.access, bob.id, "   ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Please provide content or upload an image");

    let resp = srv
        .client
        .post(srv.url("/chatapp/chats/send-messagesby-loggedinuser"))
        .bearer_auth(&alice.access)
        .multipart(reqwest::multipart::Form::new().text("content", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv
        .get(
            &alice.access,
            &format!("/chatapp/chats/message-by-current-chat-user?_id={}", bob.id),
        )
        .await;
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"]["messages"].as_array().unwrap().is_empty());

    srv.server.abort();
}

#[tokio::test]
async fn image_messages_and_conversation_media() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;
    srv.start_chat(&alice.access, bob.id).await;

    let form = reqwest::multipart::Form::new().part("imageUrl", image_part(PNG, "cat.png", "image/png"));
    let resp = srv.send_form(&alice.access, bob.id, form).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["chat"]["lastMessage"], "image");
    let url = body["data"]["imageUrl"].as_str().unwrap().to_string();
    assert!(url.starts_with(&format!("http://{}/chatapp/media/", srv.addr)));

    let rows = srv.friends(&bob.access).await;
    assert_eq!(rows[0]["lastMessage"], "image");

    srv.send_text(&bob.access, alice.id, "cute").await;
    let resp = srv
        .get(
            &bob.access,
            &format!("/chatapp/chats/friend/data/for/right/side?friendId={}", alice.id),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "alice");
    assert_eq!(body["data"]["images"], json!([url.clone()]));

    let resp = srv.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["content-security-policy"], "sandbox");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), PNG);

    let form = reqwest::multipart::Form::new()
        .text("content", "notes")
        .part("imageUrl", image_part(b"just text", "notes.txt", "text/plain"));
    let resp = srv.send_form(&alice.access, bob.id, form).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\"><script>alert(1)</script></svg>";
    let form = reqwest::multipart::Form::new().part("imageUrl", image_part(svg, "x.svg", "image/svg+xml"));
    let resp = srv.send_form(&alice.access, bob.id, form).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Unsupported image type, use PNG, JPEG, GIF or WebP");

    // rejected uploads leave the thread untouched
    let resp = srv
        .get(
            &bob.access,
            &format!("/chatapp/chats/friend/data/for/right/side?friendId={}", alice.id),
        )
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["images"], json!([url]));

    srv.server.abort();
}

#[tokio::test]
async fn conversation_media_requires_existing_peer_and_chat() {
    let srv = spawn_server().await;
    let alice = srv.session("alice").await;
    let bob = srv.session("bob").await;

    let path = "/chatapp/chats/friend/data/for/right/side";
    let resp = srv.get(&alice.access, path).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = srv
        .get(&alice.access, &format!("{path}?friendId={}", Uuid::new_v4()))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = srv
        .get(&alice.access, &format!("{path}?friendId={}", bob.id))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Chat not found");

    let resp = srv
        .post_json(
            &alice.access,
            "/chatapp/chats/toggle/last/seen/logged/user",
            json!({"friendId": bob.id}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    srv.server.abort();
}

#[tokio::test]
async fn unknown_media_is_not_found() {
    let srv = spawn_server().await;
    let resp = srv
        .client
        .get(srv.url(&format!("/chatapp/media/{}", "0".repeat(64))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = srv
        .client
        .get(srv.url("/chatapp/media/not-a-hash"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    srv.server.abort();
}

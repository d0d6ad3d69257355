mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, Stream, StreamExt};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tower::ServiceExt;

use courier_api::AuthConfig;

use common::{TestApp, TestUser};

const WAIT: Duration = Duration::from_secs(5);

async fn open_sse(app: &TestApp, uri: &str, user: &TestUser) -> (StatusCode, Body) {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", user.access_token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    (response.status(), response.into_body())
}

/// Reads SSE frames until `needle` shows up, returning everything read.
async fn read_until(body: &mut Body, needle: &str) -> String {
    timeout(WAIT, async {
        let mut buf = String::new();
        while !buf.contains(needle) {
            let frame = body.frame().await.expect("stream ended").unwrap();
            if let Ok(data) = frame.into_data() {
                buf.push_str(&String::from_utf8_lossy(&data));
            }
        }
        buf
    })
    .await
    .expect("timed out waiting for SSE event")
}

/// Reads SSE frames until the server ends the stream.
async fn read_to_end(body: &mut Body) -> String {
    timeout(WAIT, async {
        let mut buf = String::new();
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                buf.push_str(&String::from_utf8_lossy(&data));
            }
        }
        buf
    })
    .await
    .expect("SSE stream was not closed")
}

async fn serve(app: &TestApp) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.router.clone()).into_future());
    addr
}

/// Skips events until the server's close frame and returns its code.
async fn close_code<S>(ws: &mut S) -> Option<u16>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    timeout(WAIT, async {
        while let Some(Ok(msg)) = ws.next().await {
            if let WsMessage::Close(frame) = msg {
                return frame.map(|f| u16::from(f.code));
            }
        }
        None
    })
    .await
    .expect("socket was not closed")
}

async fn next_event<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    timeout(WAIT, async {
        loop {
            match ws.next().await.expect("socket closed").unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for gateway event")
}

#[tokio::test]
async fn chat_stream_delivers_message_events() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let chat = app.create_chat(&alice, "general", &[&bob]).await;
    let chat_id = chat["chatId"].as_str().unwrap();

    let (status, mut body) = open_sse(&app, &format!("/api/v1/chats/{chat_id}/events"), &bob).await;
    assert_eq!(status, StatusCode::OK);

    app.send(&alice, chat_id, "hello bob").await;

    let text = read_until(&mut body, "hello bob").await;
    assert!(text.contains("event: MessageCreate"), "{text}");
}

#[tokio::test]
async fn chat_stream_is_members_only() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let eve = app.register("eve").await;
    let chat = app.create_chat(&alice, "general", &[]).await;
    let uri = format!("/api/v1/chats/{}/events", chat["chatId"].as_str().unwrap());

    let (status, _) = open_sse(&app, &uri, &eve).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn user_stream_sees_new_chats() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let (status, mut body) = open_sse(&app, "/api/v1/events", &bob).await;
    assert_eq!(status, StatusCode::OK);

    app.create_chat(&alice, "for-bob", &[&bob]).await;

    let text = read_until(&mut body, "for-bob").await;
    assert!(text.contains("event: ChatCreate"), "{text}");
}

#[tokio::test]
async fn blocking_a_user_ends_their_streams() {
    let app = TestApp::new();
    let admin = app.register_with_email("root", "admin@example.com").await;
    let bob = app.register("bob").await;
    let chat = app.create_chat(&admin, "general", &[&bob]).await;
    let chat_id = chat["chatId"].as_str().unwrap();

    let (_, mut user_stream) = open_sse(&app, "/api/v1/events", &bob).await;
    let (_, mut chat_stream) =
        open_sse(&app, &format!("/api/v1/chats/{chat_id}/events"), &bob).await;

    let (status, body) = app
        .put(
            &format!("/api/v1/users/{}", bob.user_id),
            &admin.access_token,
            json!({ "role": "blocked" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    app.send(&admin, chat_id, "not for bob").await;

    assert!(!read_to_end(&mut user_stream).await.contains("not for bob"));
    assert!(!read_to_end(&mut chat_stream).await.contains("not for bob"));
}

#[tokio::test]
async fn logout_ends_only_that_sessions_stream() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let (status, other_login) = app
        .request(
            axum::http::Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": alice.email, "password": common::PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{other_login}");
    let other = TestUser {
        access_token: other_login["accessToken"].as_str().unwrap().to_string(),
        ..alice.clone()
    };

    let (_, mut this_stream) = open_sse(&app, "/api/v1/events", &alice).await;
    let (_, mut other_stream) = open_sse(&app, "/api/v1/events", &other).await;

    let (status, _) = app
        .post("/api/v1/auth/logout", &alice.access_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    read_to_end(&mut this_stream).await;

    app.create_chat(&other, "still-here", &[]).await;
    read_until(&mut other_stream, "still-here").await;
}

#[tokio::test]
async fn sse_ends_when_the_access_token_expires() {
    let mut config = AuthConfig::new(common::JWT_SECRET);
    config.access_ttl_secs = 2;
    let app = TestApp::with_config(config);
    let alice = app.register("alice").await;

    let (status, mut body) = open_sse(&app, "/api/v1/events", &alice).await;
    assert_eq!(status, StatusCode::OK);
    read_to_end(&mut body).await;
}

#[tokio::test]
async fn logout_closes_the_websocket() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let addr = serve(&app).await;

    let url = format!("ws://{addr}/api/v1/ws?accessToken={}", alice.access_token);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(next_event(&mut ws).await["type"], "Ready");

    let (status, _) = app
        .post("/api/v1/auth/logout", &alice.access_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(close_code(&mut ws).await, Some(1008));
}

#[tokio::test]
async fn websocket_session() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let chat = app.create_chat(&alice, "general", &[&bob]).await;
    let chat_id = chat["chatId"].as_str().unwrap().to_string();
    let other = app.create_chat(&alice, "random", &[&bob]).await;
    let other_id = other["chatId"].as_str().unwrap().to_string();

    let addr = serve(&app).await;

    let url = format!("ws://{addr}/api/v1/ws?accessToken={}", alice.access_token);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let ready = next_event(&mut ws).await;
    assert_eq!(ready["type"], "Ready");
    assert_eq!(ready["data"]["userId"], alice.user_id);

    let presence = next_event(&mut ws).await;
    assert_eq!(presence["type"], "PresenceUpdate");
    assert_eq!(presence["data"]["status"], "online");

    let (_, me) = app.get("/api/v1/auth/me", &alice.access_token).await;
    assert_eq!(me["status"], "online");

    ws.send(WsMessage::Text(json!({ "type": "GetChats" }).to_string().into()))
        .await
        .unwrap();
    let chats = next_event(&mut ws).await;
    assert_eq!(chats["type"], "Chats");
    assert_eq!(chats["data"]["chats"].as_array().unwrap().len(), 2);

    app.send(&bob, &chat_id, "over the wire").await;
    let created = next_event(&mut ws).await;
    assert_eq!(created["type"], "MessageCreate");
    assert_eq!(created["data"]["message"]["content"], "over the wire");

    ws.send(WsMessage::Text(
        json!({ "type": "GetMessages", "data": { "chatId": chat_id } })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    let messages = next_event(&mut ws).await;
    assert_eq!(messages["type"], "Messages");
    assert_eq!(messages["data"]["messages"].as_array().unwrap().len(), 1);

    // Narrow to the other chat; events from "general" stop arriving
    ws.send(WsMessage::Text(
        json!({ "type": "Subscribe", "data": { "chatIds": [other_id] } })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.send(&bob, &chat_id, "filtered out").await;
    app.send(&bob, &other_id, "let through").await;
    let next = next_event(&mut ws).await;
    assert_eq!(next["data"]["message"]["content"], "let through");

    ws.send(WsMessage::Text(r#"{"type":"Nope"}"#.to_string().into()))
        .await
        .unwrap();
    let exception = next_event(&mut ws).await;
    assert_eq!(exception["type"], "Exception");

    ws.close(None).await.unwrap();

    let offline = timeout(WAIT, async {
        loop {
            let (_, me) = app.get("/api/v1/auth/me", &alice.access_token).await;
            if me["status"] == "offline" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(offline.is_ok(), "user never went offline");
}

#[tokio::test]
async fn websocket_requires_a_token() {
    let app = TestApp::new();

    let addr = serve(&app).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/ws")).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(e) => panic!("expected HTTP 401, got {e}"),
        Ok(_) => panic!("upgrade without a token should be refused"),
    }
}

//! End-to-end gateway tests: a real axum server on an ephemeral port, real
//! tokio-tungstenite clients, and the REST fallback exercised with reqwest.

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use taskline_gateway::auth::{JwtVerifier, SharedVerifier};
use taskline_gateway::config::GatewayConfig;
use taskline_gateway::server::{build_router, AppState};
use taskline_gateway::store::{MemoryNotificationStore, SharedStore};
use taskline_proto::{ClientFrame, NewNotification, NotificationKind, ServerFrame, TaskId, UserId};

const SECRET: &str = "integration-secret";

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

fn mint_token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token encodes")
}

async fn spawn_gateway() -> SocketAddr {
    let config = GatewayConfig::for_tests(SECRET);
    let verifier: SharedVerifier = Arc::new(JwtVerifier::new(SECRET));
    let store: SharedStore = Arc::new(MemoryNotificationStore::new());
    let state = AppState::new(Arc::new(config), verifier, store, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state))
            .await
            .expect("server runs");
    });
    addr
}

async fn connect(addr: SocketAddr, identity: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?token={}", mint_token(identity));
    let (client, _) = connect_async(&url).await.expect("websocket connects");
    client
}

async fn send(client: &mut WsClient, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).expect("frame serializes");
    client
        .send(Message::Text(text))
        .await
        .expect("frame sends");
}

async fn next_frame(client: &mut WsClient) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame arrives in time")
            .expect("stream open")
            .expect("read succeeds");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("server frame parses")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

fn new_notification(recipient: &str) -> NewNotification {
    NewNotification {
        recipient: UserId::new(recipient),
        sender: UserId::new("admin"),
        task: Some(TaskId::new("T7")),
        message: "you were assigned T7".to_string(),
        kind: NotificationKind::Assigned,
    }
}

#[test_timeout::tokio_timeout_test]
async fn handshake_binds_identity_and_auto_joins_the_user_room() {
    let addr = spawn_gateway().await;
    let mut client = connect(addr, "u1").await;

    match next_frame(&mut client).await {
        ServerFrame::Connected { identity } => assert_eq!(identity, UserId::new("u1")),
        other => panic!("expected connected frame, got {other:?}"),
    }

    // No explicit join happened, yet a dispatched notification arrives.
    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/internal/notifications"))
        .bearer_auth(SECRET)
        .json(&new_notification("u1"))
        .send()
        .await
        .expect("dispatch request");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["delivered"], true);

    match next_frame(&mut client).await {
        ServerFrame::Notification { notification } => {
            assert_eq!(notification.recipient, UserId::new("u1"));
            assert!(!notification.read);
        }
        other => panic!("expected notification frame, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn invalid_credential_is_rejected_before_the_upgrade() {
    let addr = spawn_gateway().await;

    let err = connect_async(format!("ws://{addr}/ws?token=not-a-jwt"))
        .await
        .expect_err("handshake must fail");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected http rejection, got {other:?}"),
    }

    let err = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("missing credential must fail");
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(_)
    ));

    // Nothing was registered by the failed handshakes.
    let stats: serde_json::Value = reqwest::get(format!("http://{addr}/debug/stats"))
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats json");
    assert_eq!(stats["sessions_online"], 0);
}

#[test_timeout::tokio_timeout_test]
async fn internal_endpoints_require_the_service_credential() {
    let addr = spawn_gateway().await;
    let http = reqwest::Client::new();

    // No credential at all.
    let bare = http
        .post(format!("http://{addr}/internal/notifications"))
        .json(&new_notification("u1"))
        .send()
        .await
        .expect("bare request");
    assert_eq!(bare.status(), 401);

    // A valid end-user token is not a service credential.
    let user_token = http
        .post(format!("http://{addr}/internal/notifications"))
        .bearer_auth(mint_token("u1"))
        .json(&new_notification("u1"))
        .send()
        .await
        .expect("user token request");
    assert_eq!(user_token.status(), 401);

    let broadcast = http
        .post(format!("http://{addr}/internal/tasks/T1/updated"))
        .json(&serde_json::json!({"status": "done"}))
        .send()
        .await
        .expect("bare broadcast request");
    assert_eq!(broadcast.status(), 401);

    // None of the rejected calls persisted anything.
    let list: serde_json::Value = http
        .get(format!("http://{addr}/api/notifications"))
        .bearer_auth(mint_token("u1"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list body");
    assert_eq!(list["count"], 0);
}

#[test_timeout::tokio_timeout_test]
async fn task_broadcasts_reach_watchers_and_user_pushes_reach_all_sessions() {
    let addr = spawn_gateway().await;

    // U1 runs two sessions; only the first watches task:T7.
    let mut s1 = connect(addr, "U1").await;
    let mut s2 = connect(addr, "U1").await;
    let mut other = connect(addr, "U9").await;
    for client in [&mut s1, &mut s2, &mut other] {
        assert!(matches!(
            next_frame(client).await,
            ServerFrame::Connected { .. }
        ));
    }

    send(
        &mut s1,
        &ClientFrame::Join {
            topic: "task:T7".to_string(),
        },
    )
    .await;
    assert!(matches!(next_frame(&mut s1).await, ServerFrame::Joined { .. }));

    let http = reqwest::Client::new();
    let response: serde_json::Value = http
        .post(format!("http://{addr}/internal/tasks/T7/updated"))
        .bearer_auth(SECRET)
        .json(&serde_json::json!({"status": "in_progress"}))
        .send()
        .await
        .expect("broadcast request")
        .json()
        .await
        .expect("broadcast body");
    assert_eq!(response["delivered"], 1);

    match next_frame(&mut s1).await {
        ServerFrame::TaskUpdated { task_id, snapshot } => {
            assert_eq!(task_id, TaskId::new("T7"));
            assert_eq!(snapshot["status"], "in_progress");
        }
        other => panic!("expected task_updated, got {other:?}"),
    }

    // A user push reaches both of U1's sessions and nobody else.
    http.post(format!("http://{addr}/internal/notifications"))
        .bearer_auth(SECRET)
        .json(&new_notification("U1"))
        .send()
        .await
        .expect("dispatch request");
    for client in [&mut s1, &mut s2] {
        assert!(matches!(
            next_frame(client).await,
            ServerFrame::Notification { .. }
        ));
    }

    // `other` saw neither frame; a ping/pong round-trip proves the socket is
    // empty rather than slow.
    send(&mut other, &ClientFrame::Ping).await;
    assert!(matches!(next_frame(&mut other).await, ServerFrame::Pong { .. }));
}

#[test_timeout::tokio_timeout_test]
async fn joining_another_users_room_is_refused() {
    let addr = spawn_gateway().await;
    let mut client = connect(addr, "u1").await;
    assert!(matches!(
        next_frame(&mut client).await,
        ServerFrame::Connected { .. }
    ));

    send(
        &mut client,
        &ClientFrame::Join {
            topic: "user:u2".to_string(),
        },
    )
    .await;
    match next_frame(&mut client).await {
        ServerFrame::Error { message } => assert!(message.contains("user:u2")),
        other => panic!("expected error frame, got {other:?}"),
    }

    // The session itself stays healthy.
    send(&mut client, &ClientFrame::Ping).await;
    assert!(matches!(next_frame(&mut client).await, ServerFrame::Pong { .. }));
}

#[test_timeout::tokio_timeout_test]
async fn malformed_frames_get_error_replies_until_the_limit_closes_the_session() {
    let addr = spawn_gateway().await;
    let mut client = connect(addr, "u1").await;
    assert!(matches!(
        next_frame(&mut client).await,
        ServerFrame::Connected { .. }
    ));

    // Test config tolerates 3 malformed frames.
    for _ in 0..3 {
        client
            .send(Message::Text("{not json".to_string()))
            .await
            .expect("garbage sends");
        assert!(matches!(next_frame(&mut client).await, ServerFrame::Error { .. }));
    }

    // The gateway closes the transport after the third offence.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session should be closed by the gateway");
}

#[test_timeout::tokio_timeout_test]
async fn rest_fallback_covers_the_offline_lifecycle() {
    let addr = spawn_gateway().await;
    let http = reqwest::Client::new();
    let u1_token = mint_token("u1");

    // Recipient offline: persisted but not delivered.
    let dispatch: serde_json::Value = http
        .post(format!("http://{addr}/internal/notifications"))
        .bearer_auth(SECRET)
        .json(&new_notification("u1"))
        .send()
        .await
        .expect("dispatch request")
        .json()
        .await
        .expect("dispatch body");
    assert_eq!(dispatch["success"], true);
    assert_eq!(dispatch["delivered"], false);
    let id = dispatch["data"]["id"].as_str().expect("id present").to_string();

    // The row is visible through the list and unread-count endpoints.
    let list: serde_json::Value = http
        .get(format!("http://{addr}/api/notifications"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list body");
    assert_eq!(list["success"], true);
    assert_eq!(list["count"], 1);
    assert_eq!(list["data"][0]["id"], id.as_str());

    let unread: serde_json::Value = http
        .get(format!("http://{addr}/api/notifications/unread-count"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("unread request")
        .json()
        .await
        .expect("unread body");
    assert_eq!(unread["count"], 1);

    // Another user may not touch it.
    let foreign = http
        .put(format!("http://{addr}/api/notifications/{id}"))
        .bearer_auth(mint_token("intruder"))
        .send()
        .await
        .expect("foreign request");
    assert_eq!(foreign.status(), 403);

    // Unknown ids are 404, missing credentials 401.
    let missing = http
        .put(format!("http://{addr}/api/notifications/no-such-id"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("missing request");
    assert_eq!(missing.status(), 404);

    let anonymous = http
        .get(format!("http://{addr}/api/notifications"))
        .send()
        .await
        .expect("anonymous request");
    assert_eq!(anonymous.status(), 401);

    // Mark read, then delete.
    let marked: serde_json::Value = http
        .put(format!("http://{addr}/api/notifications/{id}"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("mark request")
        .json()
        .await
        .expect("mark body");
    assert_eq!(marked["data"]["read"], true);

    let unread: serde_json::Value = http
        .get(format!("http://{addr}/api/notifications/unread-count"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("unread request")
        .json()
        .await
        .expect("unread body");
    assert_eq!(unread["count"], 0);

    let deleted = http
        .delete(format!("http://{addr}/api/notifications/{id}"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("delete request");
    assert!(deleted.status().is_success());

    let list: serde_json::Value = http
        .get(format!("http://{addr}/api/notifications"))
        .bearer_auth(&u1_token)
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list body");
    assert_eq!(list["count"], 0);
}

#[test_timeout::tokio_timeout_test]
async fn leave_stops_task_broadcasts_for_that_session_only() {
    let addr = spawn_gateway().await;
    let mut s1 = connect(addr, "u1").await;
    let mut s2 = connect(addr, "u2").await;
    for client in [&mut s1, &mut s2] {
        assert!(matches!(
            next_frame(client).await,
            ServerFrame::Connected { .. }
        ));
        send(
            client,
            &ClientFrame::Join {
                topic: "task:T1".to_string(),
            },
        )
        .await;
        assert!(matches!(next_frame(client).await, ServerFrame::Joined { .. }));
    }

    send(
        &mut s1,
        &ClientFrame::Leave {
            topic: "task:T1".to_string(),
        },
    )
    .await;
    assert!(matches!(next_frame(&mut s1).await, ServerFrame::Left { .. }));

    let http = reqwest::Client::new();
    let response: serde_json::Value = http
        .post(format!("http://{addr}/internal/tasks/T1/updated"))
        .bearer_auth(SECRET)
        .json(&serde_json::json!({"status": "done"}))
        .send()
        .await
        .expect("broadcast request")
        .json()
        .await
        .expect("broadcast body");
    assert_eq!(response["delivered"], 1);

    assert!(matches!(
        next_frame(&mut s2).await,
        ServerFrame::TaskUpdated { .. }
    ));

    send(&mut s1, &ClientFrame::Ping).await;
    assert!(matches!(next_frame(&mut s1).await, ServerFrame::Pong { .. }));
}

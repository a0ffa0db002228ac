//! End-to-end WebSocket session against a local server.

use chrono::{Duration, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use matharena::networking::{ArenaServer, ConnectionServices};
use matharena::storage::config::ServerSettings;
use matharena::{ArenaMode, MatchType};

use crate::common::{queued_party, test_app};

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next event of the given type, skipping clock noise.
async fn next_of(socket: &mut Socket, kind: &str) -> Value {
    let wait = async {
        while let Some(frame) = socket.next().await {
            if let Message::Text(text) = frame.unwrap() {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
        panic!("socket closed before {}", kind);
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), wait)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_authenticate_join_and_forfeit_over_websocket() {
    let (app, store) = test_app();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(ArenaServer::new(
        ServerSettings::default(),
        ConnectionServices {
            auth: app.db().clone(),
            parties: app.parties().clone(),
            orchestrator: app.orchestrator().clone(),
        },
    ));
    let server_task = server.start(listener);
    let queue_task = app.orchestrator().run_queue_listener(app.matchmaker().clone());

    let (_, users_a) = queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);
    queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);
    let user_id = users_a[0];
    app.db()
        .issue_token("token-a", user_id, Utc::now() + Duration::hours(1))
        .unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    send(&mut socket, serde_json::json!({"type": "party_status"})).await;
    let error = next_of(&mut socket, "error").await;
    assert_eq!(error["message"], "Not authenticated");

    send(&mut socket, serde_json::json!({"type": "authenticate", "token": "token-a"})).await;
    let authed = next_of(&mut socket, "authenticated").await;
    assert_eq!(authed["userId"], user_id.to_string());

    send(&mut socket, serde_json::json!({"type": "party_status"})).await;
    let status = next_of(&mut socket, "party_status").await;
    assert_eq!(status["party"]["queue"]["status"], "finding_opponents");

    let match_id = app.matchmaker().run_pass(store.now()).unwrap()[0].match_id;
    let mut registered = false;
    for _ in 0..200 {
        if app.orchestrator().snapshot(match_id).await.is_some() {
            registered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(registered);

    send(
        &mut socket,
        serde_json::json!({"type": "join_team_match", "matchId": match_id, "userId": user_id}),
    )
    .await;
    let state = next_of(&mut socket, "match_state").await;
    assert_eq!(state["state"]["matchId"], match_id.to_string());

    send(
        &mut socket,
        serde_json::json!({"type": "forfeit_match", "matchId": match_id, "userId": Uuid::new_v4()}),
    )
    .await;
    let spoofed = next_of(&mut socket, "error").await;
    assert_eq!(spoofed["message"], "Message user does not match the authenticated user");

    send(
        &mut socket,
        serde_json::json!({"type": "forfeit_match", "matchId": match_id, "userId": user_id}),
    )
    .await;
    let end = next_of(&mut socket, "match_end").await;
    assert_ne!(end["outcome"]["result"], "draw");
    assert!(end["outcome"]["forfeitedBy"].is_string());

    socket.close(None).await.unwrap();
    server.stop();
    server_task.abort();
    queue_task.abort();
}

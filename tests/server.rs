mod common;

use futures::{ SinkExt, StreamExt };
use serde_json::{ json, Value };
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{ TcpListener, TcpStream };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{ connect_async, MaybeTlsStream, WebSocketStream };

use insight_agent::analytics::store::MemorySnapshotStore;
use insight_agent::analytics::{ UsageAggregator, UsageSnapshot };
use insight_agent::server::{ api, websocket, AppState };
use insight_agent::turn::TurnError;

use common::{ agent_with, credential, Script, ScriptedSource };

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn app_state(source: Arc<ScriptedSource>, key: Option<&str>) -> AppState {
    let analytics = UsageAggregator::new(Arc::new(MemorySnapshotStore::new("test"))).shared();
    let agent = agent_with(source, credential(key), analytics.clone());
    AppState { agent: Arc::new(agent), analytics, api_key: None }
}

async fn spawn_ws(state: AppState, api_key: Option<&str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let api_key = api_key.map(str::to_string);
    tokio::spawn(async move {
        let _ = websocket::serve(listener, state, api_key, 100).await;
    });
    addr
}

async fn spawn_http(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, api::router(state)).await;
    });
    addr
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).unwrap();
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended early: {:?}", other),
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn chat_streams_deltas_then_response() {
    let source = ScriptedSource::new(Script::text(&["Go ", "Heels!"]));
    let addr = spawn_ws(app_state(source, Some("key")), None).await;
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["type"], "response");
    assert!(greeting["content"].as_str().unwrap().starts_with("Hello Tar Heel!"));

    send_json(&mut ws, json!({ "type": "chat", "content": "Cheer for me" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "processing");
    assert_eq!(next_json(&mut ws).await, json!({ "type": "delta", "content": "Go " }));
    assert_eq!(next_json(&mut ws).await, json!({ "type": "delta", "content": "Go Heels!" }));

    let done = next_json(&mut ws).await;
    assert_eq!(done["type"], "response");
    assert_eq!(done["content"], "Go Heels!");
}

#[tokio::test]
async fn failed_turn_reports_kind_and_fixed_text() {
    let source = ScriptedSource::new(Script::text(&["unused"]));
    let addr = spawn_ws(app_state(source.clone(), None), None).await;
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut ws).await;

    send_json(&mut ws, json!({ "type": "chat", "content": "hello" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "processing");
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "credential_missing");
    assert_eq!(error["message"], TurnError::CredentialMissing.user_message());
    assert_eq!(source.calls(), 0);

    send_json(&mut ws, json!({ "type": "select_credential", "api_key": "picked" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "credential_selected");

    send_json(&mut ws, json!({ "type": "chat", "content": "hello again" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "processing");
    assert_eq!(next_json(&mut ws).await["type"], "delta");
    assert_eq!(next_json(&mut ws).await["content"], "unused");
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn uploaded_document_feeds_the_next_prompt() {
    let source = ScriptedSource::new(Script::text(&["Oct 3"]));
    let addr = spawn_ws(app_state(source.clone(), Some("key")), None).await;
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut ws).await;

    send_json(
        &mut ws,
        json!({ "type": "upload", "name": "syllabus.md", "content": "Midterm: Oct 3" })
    ).await;
    let loaded = next_json(&mut ws).await;
    assert_eq!(loaded["type"], "document_loaded");
    assert_eq!(loaded["name"], "syllabus.md");

    send_json(&mut ws, json!({ "type": "chat", "content": "When is the midterm?" })).await;
    while next_json(&mut ws).await["type"] != "response" {}
    assert!(source.last_request().unwrap().prompt.contains("Midterm: Oct 3"));

    send_json(&mut ws, json!({ "type": "discard_document" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "document_cleared");

    send_json(&mut ws, json!({ "type": "chat", "content": "Anything else?" })).await;
    while next_json(&mut ws).await["type"] != "response" {}
    assert_eq!(source.last_request().unwrap().prompt, "Anything else?");
}

#[tokio::test]
async fn unsupported_upload_and_bad_json_are_errors() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let addr = spawn_ws(app_state(source, Some("key")), None).await;
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut ws).await;

    send_json(&mut ws, json!({ "type": "upload", "name": "scan.pdf", "content": "%PDF" })).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(error.get("kind").is_none());

    ws.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send_json(&mut ws, json!({ "type": "chat", "content": "  " })).await;
    assert_eq!(next_json(&mut ws).await["type"], "error");
}

#[tokio::test]
async fn api_key_is_required_when_configured() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let addr = spawn_ws(app_state(source, Some("key")), Some("secret")).await;

    assert!(connect_async(format!("ws://{}", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/?api_key=wrong", addr)).await.is_err());

    let (mut ws, _) = connect_async(format!("ws://{}/?api_key=secret", addr)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "response");
}

#[tokio::test]
async fn http_api_reads_and_resets_analytics() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let state = app_state(source, None);
    state.analytics.lock().await.record_submission("food trucks");
    let addr = spawn_http(state.clone()).await;
    let http = reqwest::Client::new();

    let snapshot: UsageSnapshot = http
        .get(format!("http://{}/api/analytics", addr))
        .send().await
        .unwrap()
        .json().await
        .unwrap();
    assert_eq!(snapshot.total_queries, 1241);
    assert_eq!(snapshot.topic_count("Dining"), Some(1));

    let reset: UsageSnapshot = http
        .post(format!("http://{}/api/analytics/reset", addr))
        .send().await
        .unwrap()
        .json().await
        .unwrap();
    assert_eq!(reset, UsageSnapshot::seed());
    assert_eq!(state.analytics.lock().await.snapshot(), &UsageSnapshot::seed());
}

#[tokio::test]
async fn http_api_selects_credential() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let addr = spawn_http(app_state(source, None)).await;
    let http = reqwest::Client::new();
    let url = format!("http://{}/api/credential", addr);

    let status: Value = http.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(status, json!({ "hasCredential": false }));

    let status: Value = http
        .post(&url)
        .json(&json!({ "apiKey": "picked" }))
        .send().await
        .unwrap()
        .json().await
        .unwrap();
    assert_eq!(status, json!({ "hasCredential": true }));
}

#[tokio::test]
async fn credential_selection_is_per_connection() {
    let source = ScriptedSource::new(Script::text(&["ok"]));
    let state = app_state(source.clone(), None);
    let addr = spawn_ws(state.clone(), None).await;

    let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut first).await;
    next_json(&mut second).await;

    send_json(&mut first, json!({ "type": "select_credential", "api_key": "mine" })).await;
    assert_eq!(next_json(&mut first).await["type"], "credential_selected");

    send_json(&mut second, json!({ "type": "chat", "content": "hello" })).await;
    assert_eq!(next_json(&mut second).await["type"], "processing");
    assert_eq!(next_json(&mut second).await["kind"], "credential_missing");

    send_json(&mut first, json!({ "type": "chat", "content": "hello" })).await;
    while next_json(&mut first).await["type"] != "response" {}
    assert_eq!(source.calls(), 1);
    assert_eq!(source.last_api_key().as_deref(), Some("mine"));
    assert!(!state.agent.credentials().has_credential().await);
}

#[tokio::test]
async fn clearing_a_selection_does_not_touch_other_connections() {
    let source = ScriptedSource::new(Script::text(&["ok"]));
    let addr = spawn_ws(app_state(source.clone(), Some("server-key")), None).await;

    let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut first).await;
    next_json(&mut second).await;

    send_json(&mut first, json!({ "type": "select_credential", "api_key": "" })).await;
    assert_eq!(next_json(&mut first).await["type"], "credential_selected");

    send_json(&mut second, json!({ "type": "chat", "content": "hello" })).await;
    while next_json(&mut second).await["type"] != "response" {}
    assert_eq!(source.last_api_key().as_deref(), Some("server-key"));
}

#[tokio::test]
async fn analytics_reset_is_pushed_to_open_connections() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let state = app_state(source, None);
    let addr = spawn_ws(state.clone(), None).await;
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    next_json(&mut ws).await;

    state.analytics.lock().await.record_submission("housing");
    state.analytics.lock().await.reset();

    assert_eq!(next_json(&mut ws).await, json!({ "type": "analytics_reset" }));
}

#[tokio::test]
async fn mutating_http_routes_require_api_key() {
    let source = ScriptedSource::new(Script::text(&["x"]));
    let mut state = app_state(source, Some("server-key"));
    state.api_key = Some("secret".to_string());
    let addr = spawn_http(state.clone()).await;
    let http = reqwest::Client::new();
    let credential_url = format!("http://{}/api/credential", addr);
    let reset_url = format!("http://{}/api/analytics/reset", addr);

    let denied = http.post(&credential_url).json(&json!({ "apiKey": "" })).send().await.unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(state.agent.credentials().has_credential().await);

    let denied = http.post(&reset_url).header("X-API-Key", "wrong").send().await.unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let allowed = http.post(&reset_url).header("X-API-Key", "secret").send().await.unwrap();
    assert!(allowed.status().is_success());

    let read = http.get(format!("http://{}/api/analytics", addr)).send().await.unwrap();
    assert!(read.status().is_success());
}

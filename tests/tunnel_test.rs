// Tunnel integration tests
//
// An in-process WebSocket server plays the ActionCable side; wiremock plays
// the agent's local dev server.

use std::sync::Arc;
use std::time::Duration;

use botster_hub::tunnel::{TunnelConfig, TunnelManager, TunnelStatus};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Cable = WebSocketStream<TcpStream>;

async fn start_manager() -> (TcpListener, Arc<TunnelManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manager = Arc::new(TunnelManager::new(TunnelConfig::new(
        "hub-1",
        "btstr_key",
        format!("http://{addr}"),
    )));
    (listener, manager)
}

fn spawn_connect(manager: &Arc<TunnelManager>) -> JoinHandle<anyhow::Result<()>> {
    let manager = Arc::clone(manager);
    tokio::spawn(async move { manager.connect().await })
}

async fn accept(listener: &TcpListener) -> Cable {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next text frame as JSON.
async fn next_json(cable: &mut Cable) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), cable.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Decoded `data` of a `message` command.
fn data_of(frame: &Value) -> Value {
    assert_eq!(frame["command"], "message");
    serde_json::from_str(frame["data"].as_str().unwrap()).unwrap()
}

/// Accept the subscription and return the channel identifier.
async fn confirm(cable: &mut Cable) -> String {
    let subscribe = next_json(cable).await;
    assert_eq!(subscribe["command"], "subscribe");
    let identifier = subscribe["identifier"].as_str().unwrap().to_string();
    let parsed: Value = serde_json::from_str(&identifier).unwrap();
    assert_eq!(parsed["channel"], "TunnelChannel");
    assert_eq!(parsed["hub_id"], "hub-1");

    cable
        .send(Message::Text(json!({"type": "welcome"}).to_string()))
        .await
        .unwrap();
    cable
        .send(Message::Text(
            json!({"type": "confirm_subscription", "identifier": identifier}).to_string(),
        ))
        .await
        .unwrap();
    identifier
}

async fn send_request(cable: &mut Cable, identifier: &str, request_id: &str, key: &str, path: &str) {
    let frame = json!({
        "identifier": identifier,
        "message": {
            "type": "http_request",
            "request_id": request_id,
            "session_key": key,
            "method": "GET",
            "path": path,
            "headers": {"Accept": "text/plain"},
        }
    });
    cable.send(Message::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_registrations_made_before_connect_are_sent_on_confirm() {
    let (listener, manager) = start_manager().await;
    manager.register_agent("owner-repo-1", 4101);
    manager.register_agent("owner-repo-2", 4102);
    manager.unregister_agent("owner-repo-2");

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    confirm(&mut cable).await;

    let register = data_of(&next_json(&mut cable).await);
    assert_eq!(register["action"], "register_agent_tunnel");
    assert_eq!(register["session_key"], "owner-repo-1");
    assert_eq!(register["port"], 4101);
    assert_eq!(manager.get_status(), TunnelStatus::Connected);

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(manager.get_status(), TunnelStatus::Disconnected);
}

#[tokio::test]
async fn test_registration_after_confirm_is_sent_live() {
    let (listener, manager) = start_manager().await;

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    let identifier = confirm(&mut cable).await;

    // Wait until the confirm has been processed before registering
    for _ in 0..100 {
        if manager.get_status() == TunnelStatus::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.get_status(), TunnelStatus::Connected);

    manager.register_agent("owner-repo-3", 4103);
    let frame = next_json(&mut cable).await;
    assert_eq!(frame["identifier"], identifier.as_str());
    let register = data_of(&frame);
    assert_eq!(register["action"], "register_agent_tunnel");
    assert_eq!(register["session_key"], "owner-repo-3");
    assert_eq!(register["port"], 4103);

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registrations_are_replayed_after_reconnect() {
    let (listener, manager) = start_manager().await;
    manager.register_agent("owner-repo-1", 4101);

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    confirm(&mut cable).await;
    let register = data_of(&next_json(&mut cable).await);
    assert_eq!(register["session_key"], "owner-repo-1");

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(manager.get_status(), TunnelStatus::Disconnected);

    // Second session on a fresh socket
    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    confirm(&mut cable).await;
    let register = data_of(&next_json(&mut cable).await);
    assert_eq!(register["action"], "register_agent_tunnel");
    assert_eq!(register["session_key"], "owner-repo-1");
    assert_eq!(register["port"], 4101);
    assert_eq!(manager.get_status(), TunnelStatus::Connected);

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_http_request_is_relayed_to_local_server() {
    let local = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-agent", "yes")
                .set_body_raw("hi there", "text/plain"),
        )
        .mount(&local)
        .await;

    let (listener, manager) = start_manager().await;
    manager.register_agent("owner-repo-1", local.address().port());

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    let identifier = confirm(&mut cable).await;
    let _register = next_json(&mut cable).await;

    send_request(&mut cable, &identifier, "req-1", "owner-repo-1", "/hello").await;

    let response = data_of(&next_json(&mut cable).await);
    assert_eq!(response["type"], "http_response");
    assert_eq!(response["request_id"], "req-1");
    assert_eq!(response["status"], 200);
    assert_eq!(response["body"], "hi there");
    assert_eq!(response["content_type"], "text/plain");
    assert_eq!(response["headers"]["x-agent"], "yes");

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_request_does_not_block_fast_one() {
    let local = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&local)
        .await;
    Mock::given(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
        .mount(&local)
        .await;

    let (listener, manager) = start_manager().await;
    manager.register_agent("owner-repo-1", local.address().port());

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    let identifier = confirm(&mut cable).await;
    let _register = next_json(&mut cable).await;

    send_request(&mut cable, &identifier, "slow", "owner-repo-1", "/slow").await;
    send_request(&mut cable, &identifier, "fast", "owner-repo-1", "/fast").await;

    let started = std::time::Instant::now();
    let response = data_of(&next_json(&mut cable).await);
    assert_eq!(response["request_id"], "fast");
    assert!(started.elapsed() < Duration::from_secs(3));

    task.abort();
}

#[tokio::test]
async fn test_unknown_agent_gets_502() {
    let (listener, manager) = start_manager().await;

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    let identifier = confirm(&mut cable).await;

    send_request(&mut cable, &identifier, "req-9", "nobody", "/").await;

    let response = data_of(&next_json(&mut cable).await);
    assert_eq!(response["request_id"], "req-9");
    assert_eq!(response["status"], 502);
    assert!(response["body"].as_str().unwrap().contains("nobody"));

    cable.close(None).await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_subscription_is_an_error() {
    let (listener, manager) = start_manager().await;

    let task = spawn_connect(&manager);
    let mut cable = accept(&listener).await;
    let _subscribe = next_json(&mut cable).await;
    cable
        .send(Message::Text(json!({"type": "reject_subscription"}).to_string()))
        .await
        .unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("rejected"));
    assert_eq!(manager.get_status(), TunnelStatus::Disconnected);
}

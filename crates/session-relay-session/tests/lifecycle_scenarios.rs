use std::{sync::Arc, time::Duration};

use serde_json::Value;
use session_relay_core::{ConnectionInfo, InboundMessage, SessionState, config::BackendConfig};
use session_relay_session::{
    BackendNotifier, LoopbackFactory, ManagerOptions, MemoryGuard, ReconnectPolicy,
    SessionManager, memory::FixedProbe,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn options() -> ManagerOptions {
    ManagerOptions {
        reconnect: ReconnectPolicy::new(3, Duration::from_millis(50), Duration::from_millis(200)),
        keep_alive_interval: Duration::from_secs(30),
        queue_capacity: 10,
        queue_pacing: Duration::from_millis(5),
        artifacts_dir: None,
        ..ManagerOptions::default()
    }
}

fn manager(factory: &LoopbackFactory, notifier: BackendNotifier) -> SessionManager {
    SessionManager::new(
        Arc::new(factory.clone()),
        notifier,
        Arc::new(MemoryGuard::new(FixedProbe::megabytes(32), 450)),
        options(),
    )
}

fn notifier_for(server: &MockServer) -> BackendNotifier {
    let config = BackendConfig {
        base_url: server.uri(),
        timeout_ms: 1_000,
        ..BackendConfig::default()
    };
    BackendNotifier::new(&config, "secret")
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn bodies_for(server: &MockServer, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

async fn wait_for_request(server: &MockServer, route: &str) -> Value {
    for _ in 0..300 {
        if let Some(body) = bodies_for(server, route).await.into_iter().next() {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backend never received {route}");
}

#[tokio::test]
async fn auto_pairing_client_reaches_ready_and_notifies_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new("Clinic", "33600000001"));
    let manager = manager(&factory, notifier_for(&server));
    manager.initialize();
    wait_for("ready", || manager.state() == SessionState::Ready).await;

    let body = wait_for_request(&server, "/whatsapp/connected").await;
    assert_eq!(body["status"], "connected");
    assert_eq!(body["displayName"], "Clinic");
    assert_eq!(body["phone"], "33600000001");
    assert!(body["timestamp"].is_string());

    let stats = manager.stats();
    assert!(stats.connected);
    assert_eq!(stats.connection.unwrap().display_name, "Clinic");
}

#[tokio::test]
async fn disconnect_notifies_backend_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let factory = LoopbackFactory::new();
    let manager = manager(&factory, notifier_for(&server));
    manager.initialize();
    wait_for("client start", || factory.started() == 1).await;
    factory.emit_ready(ConnectionInfo::new("Clinic", "336"));
    wait_for("ready", || manager.state() == SessionState::Ready).await;

    factory.emit_disconnected("NAVIGATION");
    let body = wait_for_request(&server, "/whatsapp/disconnected").await;
    assert_eq!(body["reason"], "NAVIGATION");

    wait_for("reconnect", || factory.created() == 2).await;
    assert_eq!(manager.state(), SessionState::Authenticating);
    factory.emit_ready(ConnectionInfo::new("Clinic", "336"));
    wait_for("ready again", || manager.state() == SessionState::Ready).await;
    assert_eq!(manager.stats().attempt_count, 0);
}

#[tokio::test]
async fn inbound_messages_are_forwarded_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/whatsapp/message"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let factory = LoopbackFactory::new();
    let manager = manager(&factory, notifier_for(&server));
    manager.initialize();
    wait_for("client start", || factory.started() == 1).await;
    factory.emit_ready(ConnectionInfo::new("Clinic", "336"));
    wait_for("ready", || manager.state() == SessionState::Ready).await;

    for i in 0..3 {
        factory.emit_message(InboundMessage::text("33611111111@c.us", format!("hello {i}")));
    }
    wait_for("all processed", || manager.stats().queue.processed == 3).await;

    let bodies = bodies_for(&server, "/whatsapp/message").await;
    let texts: Vec<_> = bodies.iter().map(|b| b["body"].as_str().unwrap_or_default()).collect();
    assert_eq!(texts, ["hello 0", "hello 1", "hello 2"]);
    assert_eq!(bodies[0]["from"], "33611111111@c.us");
    assert_eq!(bodies[0]["hasMedia"], false);
    assert_eq!(bodies[0]["type"], "chat");
}

#[tokio::test]
async fn failing_backend_never_blocks_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new("Clinic", "336"));
    let manager = manager(&factory, notifier_for(&server));
    manager.initialize();
    wait_for("ready", || manager.state() == SessionState::Ready).await;

    factory.emit_message(InboundMessage::text("336@c.us", "need the signature link"));
    wait_for("message processed", || manager.stats().queue.processed == 1).await;
    assert_eq!(manager.stats().queue.failed, 0);
    assert!(factory.sent().is_empty(), "no auto-reply for a message the backend refused");

    let receipt = manager.send_text("33699999999", "hello").await.unwrap();
    assert!(receipt.message_id.contains("33699999999@c.us"));
}

#[tokio::test]
async fn keyword_message_is_answered_after_backend_accepts_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new("Clinic", "336"));
    let manager = manager(&factory, notifier_for(&server));
    manager.initialize();
    wait_for("ready", || manager.state() == SessionState::Ready).await;

    factory.emit_message(InboundMessage::text("33622222222@c.us", "need the signature link"));
    wait_for("auto-reply", || factory.sent().len() == 1).await;

    let forwarded = wait_for_request(&server, "/whatsapp/message").await;
    assert_eq!(forwarded["from"], "33622222222@c.us");
    assert_eq!(factory.sent()[0].chat_id, "33622222222@c.us");
}

#[tokio::test]
async fn exhausted_session_recovers_through_forced_reconnect() {
    let factory = LoopbackFactory::new();
    factory.fail_next_starts(100);
    let manager = manager(&factory, BackendNotifier::disabled());
    manager.initialize();

    wait_for("exhaustion", || manager.stats().reconnect_exhausted).await;
    let stats = manager.stats();
    assert_eq!(stats.state, SessionState::Disconnected);
    assert_eq!(stats.attempt_count, 3);
    assert_eq!(factory.created(), 4);

    factory.fail_next_starts(0);
    manager.force_reconnect();
    wait_for("restart", || factory.started() == 5).await;
    factory.emit_ready(ConnectionInfo::new("Clinic", "336"));
    wait_for("ready", || manager.state() == SessionState::Ready).await;
    let stats = manager.stats();
    assert_eq!(stats.attempt_count, 0);
    assert!(!stats.reconnect_exhausted);
}

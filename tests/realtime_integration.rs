//! Realtime connection manager integration tests
//!
//! A scripted transport stands in for the broker so retry, subscription and
//! dispatch behavior can be driven deterministically on a paused clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use project_manager_client::auth::{Claims, IdentityProvider, SessionTokenProvider, TokenSet};
use project_manager_client::config::RealtimeConfig;
use project_manager_client::error::{AuthError, RealtimeError};
use project_manager_client::realtime::{
    ConnectRequest, ConnectionState, ConnectionStatus, RealtimeConnectionManager, Topic, Transport,
    TransportCommand, TransportEvent, TransportLink,
};

fn token_for(subject: &str) -> String {
    let claims = Claims {
        sub: Some(subject.to_string()),
        exp: Utc::now().timestamp() + 3600,
        iat: Some(Utc::now().timestamp()),
        preferred_username: Some(subject.to_string()),
        email: None,
        realm_access: None,
        extra: Default::default(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test")).unwrap()
}

/// Identity provider that never succeeds; sessions are installed directly
struct OfflineIdentity;

#[async_trait]
impl IdentityProvider for OfflineIdentity {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
        Err(AuthError::Refresh("offline".to_string()))
    }

    async fn password_grant(&self, _u: &str, _p: &str) -> Result<TokenSet, AuthError> {
        Err(AuthError::Login("offline".to_string()))
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

fn signed_in(subject: &str) -> SessionTokenProvider {
    let tokens = SessionTokenProvider::new(Arc::new(OfflineIdentity));
    tokens
        .set_session(TokenSet::new(token_for(subject), Some("refresh".to_string())))
        .unwrap();
    tokens
}

/// Broker end of one opened link
struct BrokerSide {
    request: ConnectRequest,
    events: mpsc::Sender<TransportEvent>,
    commands: mpsc::Receiver<TransportCommand>,
}

impl BrokerSide {
    async fn accept(&self) {
        self.events.send(TransportEvent::Connected).await.unwrap();
    }

    async fn publish(&self, subscription: &str, destination: &str, body: &str) {
        self.events
            .send(TransportEvent::Message {
                subscription: subscription.to_string(),
                destination: destination.to_string(),
                message_id: None,
                body: body.to_string(),
            })
            .await
            .unwrap();
    }

    async fn next_command(&mut self) -> TransportCommand {
        tokio::time::timeout(Duration::from_secs(1), self.commands.recv())
            .await
            .expect("no command from manager")
            .expect("link released")
    }
}

struct ScriptedTransport {
    refuse: AtomicBool,
    /// Hold `open` until `release` is notified
    hold: AtomicBool,
    release: Notify,
    command_capacity: usize,
    attempts: AtomicUsize,
    opened: mpsc::UnboundedSender<BrokerSide>,
}

impl ScriptedTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerSide>) {
        Self::with_capacity(16)
    }

    fn with_capacity(command_capacity: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerSide>) {
        let (opened, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            refuse: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            command_capacity,
            attempts: AtomicUsize::new(0),
            opened,
        });
        (transport, rx)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, RealtimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RealtimeError::Transport("connection refused".to_string()));
        }
        let (event_tx, event_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(self.command_capacity);
        let _ = self.opened.send(BrokerSide {
            request,
            events: event_tx,
            commands: command_rx,
        });
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(TransportLink::new(event_rx, command_tx))
    }
}

fn manager_with(
    tokens: SessionTokenProvider,
    transport: Arc<ScriptedTransport>,
    hits: Arc<AtomicUsize>,
) -> RealtimeConnectionManager {
    let config = RealtimeConfig::default();
    RealtimeConnectionManager::builder(config.clone(), tokens)
        .transport(transport)
        .subscribe(Topic::broadcast(config.broadcast_topic.clone()), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .topic(Topic::private_queue(config.notification_queue.clone()))
        .build()
}

async fn wait_for<F>(manager: &RealtimeConnectionManager, predicate: F) -> ConnectionStatus
where
    F: Fn(&ConnectionStatus) -> bool,
{
    let mut status = manager.watch_status();
    let result = tokio::time::timeout(Duration::from_secs(120), status.wait_for(|s| predicate(s)))
        .await
        .expect("status condition not reached")
        .expect("manager stopped")
        .clone();
    result
}

async fn wait_for_hits(hits: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if hits.load(Ordering::SeqCst) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), expected);
}

async fn expect_subscriptions(broker: &mut BrokerSide, subject: &str) {
    assert_eq!(
        broker.next_command().await,
        TransportCommand::Subscribe {
            id: "sub-0".to_string(),
            destination: "/topic/notifications".to_string(),
        }
    );
    assert_eq!(
        broker.next_command().await,
        TransportCommand::Subscribe {
            id: format!("user-{}-1", subject),
            destination: "/user/queue/notifications".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_authentication_retries_exhaust_then_manual_connect_recovers() {
    let tokens = SessionTokenProvider::new(Arc::new(OfflineIdentity));
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(tokens.clone(), transport.clone(), Arc::new(AtomicUsize::new(0)));

    manager.connect();
    let status = wait_for(&manager, |s| s.state == ConnectionState::Failed).await;
    assert_eq!(status.retry_count, 5);
    assert_eq!(status.phase, "Max retries reached - authentication failed");
    assert!(!status.is_connected);
    assert_eq!(transport.attempts(), 0);

    // Nothing else is scheduled once failed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.status().state, ConnectionState::Failed);

    tokens
        .set_session(TokenSet::new(token_for("user-7"), Some("refresh".to_string())))
        .unwrap();
    manager.connect();

    let mut broker = opened.recv().await.unwrap();
    assert_eq!(broker.request.url, "ws://localhost:8081/ws/websocket");
    assert_eq!(broker.request.token, tokens.get_token().unwrap());
    broker.accept().await;

    let status = wait_for(&manager, |s| s.is_connected).await;
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.phase, "Connected to WebSocket");
    expect_subscriptions(&mut broker, "user-7").await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_reconnects_until_retry_limit() {
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-1"), transport.clone(), Arc::new(AtomicUsize::new(0)));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut broker, "user-1").await;

    transport.refuse.store(true, Ordering::SeqCst);
    broker
        .events
        .send(TransportEvent::Closed { reason: Some("server restart".to_string()) })
        .await
        .unwrap();

    let status = wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;
    assert_eq!(status.retry_count, 1);
    assert_eq!(status.last_error.as_deref(), Some("server restart"));
    assert_eq!(broker.next_command().await, TransportCommand::Disconnect);

    let status = wait_for(&manager, |s| s.state == ConnectionState::Failed).await;
    assert_eq!(status.retry_count, 5);
    assert_eq!(status.last_error.as_deref(), Some("Transport error: connection refused"));
    assert_eq!(transport.attempts(), 5);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let tokens = SessionTokenProvider::new(Arc::new(OfflineIdentity));
    let (transport, _opened) = ScriptedTransport::new();
    let manager = manager_with(tokens, transport.clone(), Arc::new(AtomicUsize::new(0)));

    manager.connect();
    wait_for(&manager, |s| s.retry_count == 1).await;

    manager.disconnect();
    let status = wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;
    assert_eq!(status.phase, "Disconnected");

    tokio::time::sleep(Duration::from_secs(60)).await;
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.retry_count, 1);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_open_link() {
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-1"), transport, Arc::new(AtomicUsize::new(0)));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut broker, "user-1").await;

    manager.disconnect();
    assert_eq!(broker.next_command().await, TransportCommand::Disconnect);
    let status = wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;
    assert!(!status.is_connected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(opened.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes_and_delivers_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let private_hits = Arc::new(AtomicUsize::new(0));
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-3"), transport, hits.clone());
    let counter = private_hits.clone();
    manager
        .add_listener("/user/queue/notifications", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    manager.connect();
    let mut first = opened.recv().await.unwrap();
    first.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut first, "user-3").await;

    first
        .publish("sub-0", "/topic/notifications", r#"{"details":"Task created"}"#)
        .await;
    wait_for_hits(&hits, 1).await;
    first
        .publish("user-user-3-1", "/user/queue/notifications", r#"{"details":"Assigned"}"#)
        .await;
    wait_for_hits(&private_hits, 1).await;

    first
        .events
        .send(TransportEvent::TransportError("reset by peer".to_string()))
        .await
        .unwrap();
    wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;

    let mut second = opened.recv().await.unwrap();
    second.accept().await;
    let status = wait_for(&manager, |s| s.is_connected).await;
    assert_eq!(status.retry_count, 0);
    expect_subscriptions(&mut second, "user-3").await;

    second
        .publish("sub-0", "/topic/notifications", r#"{"details":"Task updated"}"#)
        .await;
    second
        .publish("user-user-3-1", "/user/queue/notifications", r#"{"details":"Reassigned"}"#)
        .await;
    wait_for_hits(&hits, 2).await;
    wait_for_hits(&private_hits, 2).await;

    // Each message reached its topic's listeners exactly once
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(private_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_link_is_released_on_arrival() {
    let (transport, mut opened) = ScriptedTransport::new();
    transport.hold.store(true, Ordering::SeqCst);
    let manager = manager_with(signed_in("user-8"), transport.clone(), Arc::new(AtomicUsize::new(0)));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    assert_eq!(manager.status().state, ConnectionState::Connecting);

    manager.disconnect();
    wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;

    // The open finishes after the attempt was abandoned
    transport.release.notify_one();
    assert_eq!(broker.next_command().await, TransportCommand::Disconnect);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.is_connected);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_link_does_not_block_disconnect() {
    // Room for a single command, and the broker never drains it
    let (transport, mut opened) = ScriptedTransport::with_capacity(1);
    let manager = manager_with(signed_in("user-9"), transport, Arc::new(AtomicUsize::new(0)));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;

    let result = manager.publish("/app/chat/message", &json!({"message": "hi"})).await;
    match result {
        Err(RealtimeError::Transport(reason)) => assert_eq!(reason, "link backpressure"),
        other => panic!("expected backpressure error, got {other:?}"),
    }

    manager.disconnect();
    let status = wait_for(&manager, |s| s.state == ConnectionState::Disconnected).await;
    assert!(!status.is_connected);

    assert_eq!(
        broker.next_command().await,
        TransportCommand::Subscribe {
            id: "sub-0".to_string(),
            destination: "/topic/notifications".to_string(),
        }
    );
    assert!(broker.commands.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_empty_messages_are_dropped() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-4"), transport, hits.clone());

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut broker, "user-4").await;

    broker.publish("sub-0", "/topic/notifications", "not json").await;
    broker.publish("sub-0", "/topic/notifications", "").await;
    broker.publish("sub-9", "/topic/other", r#"{"details":"x"}"#).await;
    broker
        .publish("sub-0", "/topic/notifications", r#"{"details":"Comment added"}"#)
        .await;

    wait_for_hits(&hits, 1).await;
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_publish_requires_connection() {
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-5"), transport, Arc::new(AtomicUsize::new(0)));

    let result = manager.publish("/app/chat/message", &json!({"message": "hi"})).await;
    assert!(matches!(result, Err(RealtimeError::NotConnected)));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut broker, "user-5").await;

    manager
        .publish("/app/chat/message", &json!({"message": "hi"}))
        .await
        .unwrap();
    assert_eq!(
        broker.next_command().await,
        TransportCommand::Send {
            destination: "/app/chat/message".to_string(),
            body: r#"{"message":"hi"}"#.to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_add_listener_and_shutdown() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (transport, mut opened) = ScriptedTransport::new();
    let manager = manager_with(signed_in("user-6"), transport, Arc::new(AtomicUsize::new(0)));

    let counter = hits.clone();
    manager
        .add_listener("/user/queue/notifications", move |event| {
            assert_eq!(event.payload["details"], "Assigned to you");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(matches!(
        manager.add_listener("/topic/unknown", |_| {}),
        Err(RealtimeError::UnknownTopic(_))
    ));

    manager.connect();
    let mut broker = opened.recv().await.unwrap();
    broker.accept().await;
    wait_for(&manager, |s| s.is_connected).await;
    expect_subscriptions(&mut broker, "user-6").await;

    broker
        .publish("user-user-6-1", "/user/queue/notifications", r#"{"details":"Assigned to you"}"#)
        .await;
    wait_for_hits(&hits, 1).await;

    manager.shutdown().await;
    assert_eq!(broker.next_command().await, TransportCommand::Disconnect);
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
    assert!(matches!(
        manager.publish("/app/chat/message", &json!({})).await,
        Err(RealtimeError::ManagerStopped)
    ));
}

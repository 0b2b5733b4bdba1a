//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message as WsFrame;
use chrono::Utc;
use futures_util::{sink, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use huddle_gateway::auth::jwt::{issue_access_token, JwtValidator};
use huddle_gateway::auth::{Identity, TokenValidator};
use huddle_gateway::broker::{Broker, BrokerBridge, Subscription};
use huddle_gateway::config::SessionConfig;
use huddle_gateway::db::models::{
    AccountId, ChatMessage, ContentType, Group, Notification, NotificationSeenMark, Participant,
};
use huddle_gateway::db::{self, SqliteStore, Store};
use huddle_gateway::error::{BrokerError, StoreError};
use huddle_gateway::observability;
use huddle_gateway::state::AppState;
use huddle_gateway::ws::protocol::OutboundEnvelope;
use huddle_gateway::ws::{FrameSink, Session};

pub const SECRET: &[u8] = b"integration-test-signing-secret!";
pub const MESSAGE_STREAM: &str = "chat.messages";
pub const NOTIFICATION_STREAM: &str = "chat.notifications";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn identity(id: AccountId, name: &str) -> Identity {
    Identity {
        id,
        name: name.to_string(),
    }
}

pub fn token_for(id: AccountId, name: &str) -> String {
    issue_access_token(SECRET, &identity(id, name), 900).expect("Failed to issue token")
}

pub fn chat_message(group_id: &str, sender: &Identity, content: &str) -> ChatMessage {
    ChatMessage {
        group_id: group_id.to_string(),
        sender_id: sender.id,
        sender_name: sender.name.clone(),
        group_name: "General".to_string(),
        content: content.to_string(),
        content_type: ContentType::Message,
        created_at: Utc::now(),
    }
}

// ---- In-memory collaborators ----

/// Store that keeps everything in vectors and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub groups: Mutex<HashMap<String, Group>>,
    pub participants: Mutex<Vec<Participant>>,
    pub messages: Mutex<Vec<ChatMessage>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub seen_marks: Mutex<Vec<NotificationSeenMark>>,
    /// Recipients whose notification writes fail
    pub failing_recipients: Mutex<HashSet<AccountId>>,
    pub fail_participant_lookup: AtomicBool,
    pub fail_group_lookup: AtomicBool,
    pub fail_message_append: AtomicBool,
    /// Delay before each notification write lands
    pub notification_delay_ms: AtomicU64,
}

impl RecordingStore {
    pub fn with_group(group_id: &str, name: &str, members: &[AccountId]) -> Self {
        let store = Self::default();
        store.groups.lock().unwrap().insert(
            group_id.to_string(),
            Group {
                id: group_id.to_string(),
                name: name.to_string(),
                description: String::new(),
                visibility: true,
                created_at: Utc::now(),
            },
        );
        store
            .participants
            .lock()
            .unwrap()
            .extend(members.iter().map(|id| Participant {
                group_id: group_id.to_string(),
                account_id: *id,
                joined_at: Utc::now(),
                notify: true,
                role: "member".to_string(),
            }));
        store
    }

    pub fn fail_notifications_for(&self, account_id: AccountId) {
        self.failing_recipients.lock().unwrap().insert(account_id);
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

fn injected() -> StoreError {
    StoreError::Io(std::io::Error::other("injected failure"))
}

#[async_trait]
impl Store for RecordingStore {
    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        if self.fail_group_lookup.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(self.groups.lock().unwrap().get(group_id).cloned())
    }

    async fn check_participant(
        &self,
        account_id: AccountId,
        group_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.account_id == account_id && p.group_id == group_id)
            .cloned())
    }

    async fn participant_ids(&self, group_id: &str) -> Result<Vec<AccountId>, StoreError> {
        if self.fail_participant_lookup.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.group_id == group_id)
            .map(|p| p.account_id)
            .collect())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if self.fail_message_append.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn append_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let delay = self.notification_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self
            .failing_recipients
            .lock()
            .unwrap()
            .contains(&notification.recipient_id)
        {
            return Err(injected());
        }
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn append_seen_mark(&self, mark: &NotificationSeenMark) -> Result<(), StoreError> {
        self.seen_marks.lock().unwrap().push(mark.clone());
        Ok(())
    }
}

/// Broker that only records what was published.
#[derive(Default)]
pub struct RecordingBroker {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBroker {
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, stream: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((stream.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, _stream: &str) -> Result<Subscription, BrokerError> {
        Ok(futures_util::stream::pending::<Vec<u8>>().boxed())
    }
}

// ---- Sessions without a socket ----

/// Session whose writes land in a channel.
pub fn channel_session(
    id: AccountId,
    name: &str,
) -> (Arc<Session>, mpsc::UnboundedReceiver<WsFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: FrameSink = Box::pin(sink::unfold(tx, |tx, frame: WsFrame| async move {
        tx.send(frame).map_err(axum::Error::new)?;
        Ok::<_, axum::Error>(tx)
    }));
    (Session::new(identity(id, name), sink), rx)
}

/// Session whose writes never complete.
pub fn stalled_session(id: AccountId, name: &str, write_timeout: Duration) -> Arc<Session> {
    let sink: FrameSink = Box::pin(sink::unfold((), |_, _frame: WsFrame| async move {
        futures_util::future::pending::<()>().await;
        Ok::<_, axum::Error>(())
    }));
    Session::with_write_timeout(identity(id, name), sink, write_timeout)
}

/// Next envelope written to a channel session.
pub async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<WsFrame>) -> OutboundEnvelope {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for frame")
        .expect("Session channel closed");
    match frame {
        WsFrame::Text(text) => serde_json::from_str(text.as_str()).expect("Invalid envelope JSON"),
        other => panic!("Expected text frame, got {:?}", other),
    }
}

// ---- Full server ----

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: SqliteStore,
    pub shutdown: CancellationToken,
}

impl TestServer {
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    /// Create group `group_id` with the given members.
    pub async fn seed_group(&self, group_id: &str, name: &str, members: &[AccountId]) {
        self.store
            .create_group(group_id, name)
            .await
            .expect("Failed to create group");
        for id in members {
            self.store
                .add_participant(group_id, *id, "member")
                .await
                .expect("Failed to add participant");
        }
    }

    /// Wait until the registry holds `count` sessions.
    pub async fn wait_for_sessions(&self, count: usize) {
        let registry = self.state.registry.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while registry.session_count().await != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for sessions to register");
    }
}

/// Start a gateway on a random port backed by an in-memory database,
/// with a broker bridge consuming `broker`.
pub async fn start_test_server(broker: Arc<dyn Broker>) -> TestServer {
    start_test_server_with(broker, Arc::new(JwtValidator::new(SECRET.to_vec()))).await
}

pub async fn start_test_server_with(
    broker: Arc<dyn Broker>,
    validator: Arc<dyn TokenValidator>,
) -> TestServer {
    launch(broker, validator, SessionConfig::default()).await
}

/// Like `start_test_server`, with custom session timings.
pub async fn start_test_server_with_session(
    broker: Arc<dyn Broker>,
    session: SessionConfig,
) -> TestServer {
    launch(broker, Arc::new(JwtValidator::new(SECRET.to_vec())), session).await
}

async fn launch(
    broker: Arc<dyn Broker>,
    validator: Arc<dyn TokenValidator>,
    session: SessionConfig,
) -> TestServer {
    let db = db::init_memory_db().expect("Failed to init DB");
    let store = SqliteStore::new(db);
    let state = AppState::new(
        Arc::new(store.clone()),
        validator,
        broker.clone(),
        MESSAGE_STREAM,
        session,
    )
    .with_metrics(observability::install_recorder().expect("Failed to install recorder"));

    let shutdown = CancellationToken::new();
    let bridge = BrokerBridge::new(
        broker,
        state.fanout.clone(),
        MESSAGE_STREAM,
        NOTIFICATION_STREAM,
    );
    tokio::spawn(bridge.run(shutdown.clone()));

    let app = huddle_gateway::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await
            .unwrap();
    });

    // Let the bridge subscribe before anything is published.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        state,
        store,
        shutdown,
    }
}

pub async fn connect(server: &TestServer, id: AccountId, name: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(server.ws_url(&token_for(id, name)))
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Next JSON text frame from the server, skipping control frames.
pub async fn next_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Invalid JSON frame")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Assert that no text frame arrives within `wait`.
pub async fn expect_no_frame(ws: &mut Client, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(wait, ws.next()).await {
        panic!("Unexpected frame: {}", text.as_str());
    }
}

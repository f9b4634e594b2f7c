//! In-process marketplace server standing in for the real REST and
//! websocket endpoints.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use porch_proto::{
    decode_client_frame, encode_server_frame, ApiEnvelope, ClientFrame, ConversationPageWire,
    ConversationWire, MessageKind, MessagePageWire, MessageWire, ParticipantWire, SendMessageWire,
    ServerFrame, UnreadCountWire,
};
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};

/// Opt-in log output for debugging test runs: `RUST_LOG=chat=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn participant(id: &str, name: &str) -> ParticipantWire {
    ParticipantWire {
        id: id.into(),
        name: name.into(),
        avatar_url: None,
    }
}

pub fn message_wire(
    id: &str,
    conversation_id: &str,
    sender: ParticipantWire,
    content: &str,
    unix_ts: i64,
) -> MessageWire {
    MessageWire {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender,
        content: content.into(),
        kind: MessageKind::Text,
        attachments: Vec::new(),
        created_at: OffsetDateTime::from_unix_timestamp(unix_ts).unwrap(),
    }
}

pub fn conversation_wire(id: &str, participants: Vec<ParticipantWire>) -> ConversationWire {
    ConversationWire {
        id: id.into(),
        participants,
        listing: None,
        last_message: None,
        last_message_at: None,
        unread_count: 0,
    }
}

pub struct ServerState {
    pub conversations: Mutex<Vec<ConversationWire>>,
    pub messages: Mutex<HashMap<String, Vec<MessageWire>>>,
    pub unread: AtomicU64,
    pub conversations_calls: AtomicUsize,
    pub unread_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
    pub connections: AtomicUsize,
    pub tokens: Mutex<Vec<String>>,
    pub inbound: Mutex<Vec<ClientFrame>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<ServerFrame>>>,
    kick: broadcast::Sender<()>,
    next_message_id: AtomicUsize,
}

impl ServerState {
    fn new() -> Self {
        let (kick, _) = broadcast::channel(8);
        Self {
            conversations: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            unread: AtomicU64::new(0),
            conversations_calls: AtomicUsize::new(0),
            unread_calls: AtomicUsize::new(0),
            mark_read_calls: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            inbound: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            kick,
            next_message_id: AtomicUsize::new(0),
        }
    }

    /// Push a frame to every connected client.
    pub fn push(&self, frame: ServerFrame) {
        self.clients
            .lock()
            .unwrap()
            .retain(|tx| tx.send(frame.clone()).is_ok());
    }

    /// Sever every live websocket, as a network outage would.
    pub fn kick_all(&self) {
        let _ = self.kick.send(());
    }

    pub fn inbound_contains(&self, wanted: &ClientFrame) -> bool {
        self.inbound.lock().unwrap().iter().any(|f| f == wanted)
    }

    pub fn clear_inbound(&self) {
        self.inbound.lock().unwrap().clear();
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::new());
        let app = Router::new()
            .route("/api/chat/conversations", get(list_conversations))
            .route(
                "/api/chat/conversations/:id/messages",
                get(list_messages).post(send_message),
            )
            .route("/api/chat/conversations/:id/read", post(mark_read))
            .route("/api/chat/unread-count", get(unread_count))
            .route("/chat", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn rest_base(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

/// Polls a condition until it holds or the deadline passes.
pub async fn wait_until<F>(what: &str, timeout: Duration, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

fn ok<T>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        success: true,
        data: Some(data),
        message: None,
    })
}

async fn list_conversations(
    State(state): State<Arc<ServerState>>,
) -> Json<ApiEnvelope<ConversationPageWire>> {
    state.conversations_calls.fetch_add(1, Ordering::SeqCst);
    ok(ConversationPageWire {
        conversations: state.conversations.lock().unwrap().clone(),
    })
}

async fn list_messages(
    Path(conversation_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServerState>>,
) -> Json<ApiEnvelope<MessagePageWire>> {
    let page: usize = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    let limit: usize = params
        .get("limit")
        .and_then(|p| p.parse().ok())
        .unwrap_or(50);
    let history = state.messages.lock().unwrap();
    let all = history.get(&conversation_id).cloned().unwrap_or_default();
    let skip_from_end = page.saturating_sub(1) * limit;
    let end = all.len().saturating_sub(skip_from_end);
    let start = end.saturating_sub(limit);
    ok(MessagePageWire {
        messages: all[start..end].to_vec(),
    })
}

async fn send_message(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SendMessageWire>,
) -> Json<ApiEnvelope<MessageWire>> {
    let n = state.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
    let message = MessageWire {
        id: format!("srv-{n}"),
        conversation_id: conversation_id.clone(),
        sender: participant("self", "Self"),
        content: request.content,
        kind: request.kind,
        attachments: request.attachments,
        created_at: OffsetDateTime::from_unix_timestamp(1_700_000_000 + n as i64).unwrap(),
    };
    state
        .messages
        .lock()
        .unwrap()
        .entry(conversation_id)
        .or_default()
        .push(message.clone());
    ok(message)
}

async fn mark_read(
    Path(_conversation_id): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> Json<ApiEnvelope<serde_json::Value>> {
    state.mark_read_calls.fetch_add(1, Ordering::SeqCst);
    state.unread.store(0, Ordering::SeqCst);
    ok(serde_json::Value::Null)
}

async fn unread_count(State(state): State<Arc<ServerState>>) -> Json<ApiEnvelope<UnreadCountWire>> {
    state.unread_calls.fetch_add(1, Ordering::SeqCst);
    ok(UnreadCountWire {
        count: state.unread.load(Ordering::SeqCst),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    state
        .tokens
        .lock()
        .unwrap()
        .push(params.get("token").cloned().unwrap_or_default());
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: Arc<ServerState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<ServerFrame>();
    state.clients.lock().unwrap().push(push_tx);
    let mut kick = state.kick.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = push_rx.recv() => {
                let Some(frame) = frame else { break };
                let text = encode_server_frame(&frame).unwrap();
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(frame) = decode_client_frame(&text) {
                            state.inbound.lock().unwrap().push(frame);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = kick.recv() => break,
        }
    }
}

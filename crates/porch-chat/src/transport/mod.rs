//! Transport connection manager: one authenticated websocket per session.
//!
//! A supervisor task owns the `disconnected -> connecting -> connected`
//! lifecycle and retries dropped connections with a bounded, fixed backoff.
//! Outbound frames are fire-and-forget: anything published while the link is
//! down is counted and dropped, never queued. Inbound frames fan out to a
//! handler registry keyed by event kind; registration order is preserved and
//! removal is by exact handler id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use porch_proto::{decode_server_frame, encode_client_frame, ClientFrame, EventKind, ServerFrame};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("missing credential; connection not attempted")]
    MissingCredential,
}

/// Bearer credential scoped to the signed-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: Url,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

pub type HandlerId = u64;
pub type EventHandler = Arc<dyn Fn(&ServerFrame) + Send + Sync>;

struct ActiveLink {
    credential: Credential,
    supervisor: tokio::task::JoinHandle<()>,
}

/// State shared between the manager handle and its supervisor task.
struct SocketCore {
    config: SocketConfig,
    client_id: Uuid,
    state_tx: watch::Sender<ConnectionState>,
    handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
    next_handler: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

pub struct SocketManager {
    core: Arc<SocketCore>,
    link: Mutex<Option<ActiveLink>>,
}

impl SocketManager {
    pub fn new(config: SocketConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            core: Arc::new(SocketCore {
                config,
                client_id: Uuid::new_v4(),
                state_tx,
                handlers: Mutex::new(HashMap::new()),
                next_handler: AtomicU64::new(0),
                outbound: Mutex::new(None),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            link: Mutex::new(None),
        }
    }

    /// Establish the session's connection. A second call with the same
    /// credential while the supervisor is alive is a no-op; a different
    /// credential tears the old link down first. An empty credential is
    /// rejected without any connection attempt.
    pub fn connect(&self, credential: Credential) -> Result<(), TransportError> {
        if credential.is_empty() {
            return Err(TransportError::MissingCredential);
        }
        let mut link = self.link.lock().unwrap();
        if let Some(active) = link.as_ref() {
            if active.credential == credential && !active.supervisor.is_finished() {
                tracing::debug!(target: "chat::transport", "already linked; connect is a no-op");
                return Ok(());
            }
            active.supervisor.abort();
            self.core.clear_outbound();
            self.core.set_state(ConnectionState::Disconnected);
        }
        let supervisor = tokio::spawn(run_link(Arc::clone(&self.core), credential.clone()));
        *link = Some(ActiveLink {
            credential,
            supervisor,
        });
        Ok(())
    }

    /// Release the connection. Safe when already closed.
    pub fn close(&self) {
        let link = self.link.lock().unwrap().take();
        if let Some(active) = link {
            active.supervisor.abort();
        }
        self.core.clear_outbound();
        self.core.set_state(ConnectionState::Disconnected);
    }

    /// Fire-and-forget emission. Dropped, not queued, while disconnected.
    pub fn publish(&self, frame: ClientFrame) {
        self.core.publish(frame);
    }

    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> HandlerId {
        let id = self.core.next_handler.fetch_add(1, Ordering::SeqCst) + 1;
        self.core
            .handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove exactly one previously registered handler. Returns false when
    /// the id was not registered for that event kind.
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.core.handlers.lock().unwrap();
        if let Some(entries) = handlers.get_mut(&kind) {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            return entries.len() != before;
        }
        false
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn frames_published(&self) -> u64 {
        self.core.published.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.core.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn dispatch(&self, frame: &ServerFrame) {
        self.core.dispatch(frame);
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        if let Ok(mut link) = self.link.lock() {
            if let Some(active) = link.take() {
                active.supervisor.abort();
            }
        }
    }
}

impl SocketCore {
    fn publish(&self, frame: ClientFrame) {
        let sender = self.outbound.lock().unwrap().clone();
        let connected = *self.state_tx.borrow() == ConnectionState::Connected;
        let delivered = match sender {
            Some(tx) if connected => tx.send(frame.clone()).is_ok(),
            _ => false,
        };
        if delivered {
            self.published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "chat::transport",
                frame = frame.label(),
                "dropped outbound frame while disconnected"
            );
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::info!(
                target: "chat::transport",
                from = ?*state,
                to = ?next,
                "connection state changed"
            );
            *state = next;
            true
        });
    }

    fn clear_outbound(&self) {
        *self.outbound.lock().unwrap() = None;
    }

    fn connect_url(&self, credential: &Credential) -> Url {
        let mut url = self.config.url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("token", credential.token())
            .append_pair("client", &self.client_id.to_string());
        url
    }

    fn handle_text(&self, text: &str) {
        match decode_server_frame(text) {
            Ok(frame) => self.dispatch(&frame),
            Err(err) => {
                tracing::debug!(
                    target: "chat::transport",
                    error = %err,
                    "ignoring undecodable inbound frame"
                );
            }
        }
    }

    fn dispatch(&self, frame: &ServerFrame) {
        let kind = frame.kind();
        match kind {
            EventKind::Unknown => {
                tracing::trace!(target: "chat::transport", "ignoring unknown event");
                return;
            }
            EventKind::Pong => {
                tracing::trace!(target: "chat::transport", "pong");
            }
            _ => {}
        }
        let entries: Vec<EventHandler> = {
            let handlers = self.handlers.lock().unwrap();
            handlers
                .get(&kind)
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in entries {
            handler(frame);
        }
    }

    async fn drive<S>(&self, stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        *self.outbound.lock().unwrap() = Some(out_tx.clone());
        self.set_state(ConnectionState::Connected);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match encode_client_frame(&frame) {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "chat::transport",
                            error = %err,
                            "failed to encode outbound frame"
                        );
                    }
                }
            }
        });

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Binary(data))) => {
                            if let Ok(text) = String::from_utf8(data) {
                                self.handle_text(&text);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(
                                target: "chat::transport",
                                error = %err,
                                "socket read error"
                            );
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if out_tx.send(ClientFrame::Ping).is_err() {
                        break;
                    }
                }
            }
        }
        writer.abort();
    }
}

async fn run_link(core: Arc<SocketCore>, credential: Credential) {
    let mut attempts_left = core.config.reconnect_attempts;
    loop {
        core.set_state(ConnectionState::Connecting);
        let url = core.connect_url(&credential);
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                attempts_left = core.config.reconnect_attempts;
                core.drive(stream).await;
                core.clear_outbound();
                tracing::info!(target: "chat::transport", "socket closed");
            }
            Err(err) => {
                tracing::warn!(target: "chat::transport", error = %err, "socket connect failed");
            }
        }
        core.set_state(ConnectionState::Disconnected);
        if attempts_left == 0 {
            tracing::info!(
                target: "chat::transport",
                "reconnect budget exhausted; staying disconnected"
            );
            break;
        }
        attempts_left -= 1;
        tokio::time::sleep(core.config.reconnect_delay).await;
    }
}

//! The process-wide chat session.
//!
//! One `ChatSession` exists per authenticated user. It owns the socket, the
//! REST client, and every store, and it is the only place inbound events are
//! routed. UI surfaces hold a shared reference and read; they never mutate
//! stores directly.
//!
//! Lifecycle is explicit: [`ChatSession::init`] on login, then
//! [`ChatSession::teardown`] on logout tears down the transport and clears
//! all local chat state.

use std::sync::{Arc, Mutex};

use porch_proto::{ClientFrame, CreateConversationWire, EventKind, MessageKind, ServerFrame};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::{ChatConfig, ConfigError};
use crate::directory::{ConversationDirectory, UpsertOutcome};
use crate::model::{Attachment, Conversation, Message};
use crate::notify::Notifier;
use crate::presence::{PresenceTracker, TypingTracker};
use crate::rest::{ApiError, ChatApi, ReqwestChatApi};
use crate::rooms::RoomMembership;
use crate::timeline::MessageTimeline;
use crate::transport::{
    ConnectionState, Credential, HandlerId, SocketConfig, SocketManager, TransportError,
};
use crate::unread::UnreadCounter;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Who is signed in, as reported by the auth collaborator.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: String,
    pub token: String,
}

/// Coarse view-consistency signal for the UI. `Reconciling` covers the
/// window between a reconnect and the completion of the re-fetches; until
/// `Ready`, surfaces should present a reconnecting indicator rather than
/// possibly stale data as current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Offline,
    Connecting,
    Reconciling,
    Ready,
}

pub struct ChatSession {
    identity: SessionIdentity,
    api: Arc<dyn ChatApi>,
    socket: Arc<SocketManager>,
    directory: Arc<ConversationDirectory>,
    timeline: Arc<MessageTimeline>,
    rooms: Arc<RoomMembership>,
    unread: Arc<UnreadCounter>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingTracker>,
    notifier: Arc<dyn Notifier>,
    health_tx: watch::Sender<SessionHealth>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    subscriptions: Mutex<Vec<(EventKind, HandlerId)>>,
}

impl ChatSession {
    /// Builds the session around an injected REST backend, connects the
    /// socket, performs the initial fetches, and starts the event pump.
    /// Initial fetch failures are retryable UI states, not init failures.
    pub async fn init(
        config: ChatConfig,
        identity: SessionIdentity,
        api: Arc<dyn ChatApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, SessionError> {
        let socket = Arc::new(SocketManager::new(SocketConfig {
            url: config.socket_url().clone(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            heartbeat_interval: config.heartbeat_interval,
        }));
        let directory = Arc::new(ConversationDirectory::new(
            Arc::clone(&api),
            config.conversations_page_size,
        ));
        let timeline = Arc::new(MessageTimeline::new(
            Arc::clone(&api),
            config.messages_page_size,
        ));
        let rooms = Arc::new(RoomMembership::new(Arc::clone(&socket)));
        let unread = Arc::new(UnreadCounter::new(
            Arc::clone(&api),
            config.unread_fresh_for,
        ));
        let presence = Arc::new(PresenceTracker::new(config.presence_policy));
        let (health_tx, _) = watch::channel(SessionHealth::Connecting);

        let session = Arc::new(Self {
            identity,
            api,
            socket,
            directory,
            timeline,
            rooms,
            unread,
            presence,
            typing: Arc::new(TypingTracker::new()),
            notifier,
            health_tx,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        session
            .socket
            .connect(Credential::new(session.identity.token.clone()))?;

        if let Err(err) = session.directory.refresh().await {
            tracing::warn!(target: "chat::session", error = %err, "initial conversation fetch failed");
        }
        session.unread.refresh().await;

        let pump = Self::spawn_pump(&session);
        let ticker = Self::spawn_unread_ticker(&session, config.unread_refresh_interval);
        {
            let mut tasks = session.tasks.lock().unwrap();
            tasks.push(pump);
            tasks.push(ticker);
        }

        Ok(session)
    }

    /// Production convenience: reqwest-backed REST client keyed by the
    /// session bearer token.
    pub async fn init_with_rest(
        config: ChatConfig,
        identity: SessionIdentity,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, SessionError> {
        let api = Arc::new(ReqwestChatApi::new(
            config.rest_base_url().clone(),
            identity.token.clone(),
        )?);
        Self::init(config, identity, api, notifier).await
    }

    /// Logout contract: stop background work, close the transport, and
    /// clear every piece of local chat state.
    pub fn teardown(&self) {
        tracing::info!(target: "chat::session", "tearing down chat session");
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        for (kind, id) in self.subscriptions.lock().unwrap().drain(..) {
            self.socket.unsubscribe(kind, id);
        }
        self.socket.close();
        self.directory.clear();
        self.timeline.clear_all();
        self.presence.clear();
        self.typing.clear();
        self.rooms.clear();
        self.unread.reset();
        self.set_health(SessionHealth::Offline);
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn directory(&self) -> Arc<ConversationDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn timeline(&self) -> Arc<MessageTimeline> {
        Arc::clone(&self.timeline)
    }

    pub fn rooms(&self) -> Arc<RoomMembership> {
        Arc::clone(&self.rooms)
    }

    pub fn unread(&self) -> Arc<UnreadCounter> {
        Arc::clone(&self.unread)
    }

    pub fn presence(&self) -> Arc<PresenceTracker> {
        Arc::clone(&self.presence)
    }

    pub fn typing(&self) -> Arc<TypingTracker> {
        Arc::clone(&self.typing)
    }

    pub fn socket(&self) -> Arc<SocketManager> {
        Arc::clone(&self.socket)
    }

    pub fn health(&self) -> SessionHealth {
        *self.health_tx.borrow()
    }

    pub fn watch_health(&self) -> watch::Receiver<SessionHealth> {
        self.health_tx.subscribe()
    }

    /// Brackets a conversation becoming visible: joins its room and loads
    /// the newest page.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Vec<Message>, SessionError> {
        self.rooms.join(conversation_id);
        self.timeline.load_page(conversation_id, 1).await?;
        Ok(self.timeline.messages(conversation_id))
    }

    /// The unmount half of [`ChatSession::open_conversation`].
    pub fn close_conversation(&self, conversation_id: &str) {
        self.rooms.leave(conversation_id);
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: impl Into<String>,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) -> Result<Message, SessionError> {
        let message = self
            .timeline
            .send(conversation_id, content, kind, attachments)
            .await?;
        // Keep the directory preview aligned with the timeline's newest
        // entry; our own messages never count as unread.
        if self.directory.upsert_from_event(&message, false) == UpsertOutcome::UnknownConversation {
            if let Err(err) = self.directory.refresh().await {
                tracing::warn!(target: "chat::session", error = %err, "directory refresh after send failed");
            }
        }
        Ok(message)
    }

    /// Marks a conversation read on the server, zeroes it locally, and
    /// invalidates the shared badge counter for every subscriber.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<(), SessionError> {
        self.api.mark_read(conversation_id).await?;
        self.directory.mark_read_local(conversation_id);
        self.unread.invalidate().await;
        Ok(())
    }

    /// REST get-or-create used when a tenant initiates contact from a
    /// listing page.
    pub async fn start_conversation(
        &self,
        other_user_id: &str,
        listing_id: Option<&str>,
    ) -> Result<Conversation, SessionError> {
        let wire = self
            .api
            .create_or_get_conversation(&CreateConversationWire {
                other_user_id: other_user_id.to_string(),
                listing_id: listing_id.map(str::to_string),
            })
            .await?;
        let conversation = Conversation::from(wire);
        self.directory.upsert_conversation(conversation.clone());
        Ok(conversation)
    }

    pub fn typing_start(&self, conversation_id: &str) {
        self.socket.publish(ClientFrame::TypingStart {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn typing_stop(&self, conversation_id: &str) {
        self.socket.publish(ClientFrame::TypingStop {
            conversation_id: conversation_id.to_string(),
        });
    }

    /// Window-refocus hook: conversation state and the unread badge must
    /// reflect the latest server data whenever the app regains attention.
    pub async fn refresh_focus(&self) {
        if let Err(err) = self.directory.refresh().await {
            tracing::warn!(target: "chat::session", error = %err, "focus refresh failed");
        }
        self.unread.refresh_now().await;
    }

    fn set_health(&self, next: SessionHealth) {
        self.health_tx.send_if_modified(|health| {
            if *health == next {
                return false;
            }
            tracing::debug!(target: "chat::session", from = ?*health, to = ?next, "session health changed");
            *health = next;
            true
        });
    }

    async fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::NewMessage(wire) => {
                self.handle_new_message(Message::from(wire)).await;
            }
            ServerFrame::UserOnline(user_id) => self.presence.set_online(&user_id),
            ServerFrame::UserOffline(user_id) => self.presence.set_offline(&user_id),
            ServerFrame::UserTyping {
                conversation_id,
                user_id,
            } => {
                if user_id != self.identity.user_id {
                    self.typing.start(&conversation_id, &user_id);
                }
            }
            ServerFrame::UserStoppedTyping {
                conversation_id,
                user_id,
            } => self.typing.stop(&conversation_id, &user_id),
            ServerFrame::Pong | ServerFrame::Unknown => {}
        }
    }

    async fn handle_new_message(&self, message: Message) {
        let active = self.rooms.is_active(&message.conversation_id);
        let from_self = message.sender.id == self.identity.user_id;
        let sender_name = message.sender.name.clone();
        let content = message.content.clone();
        let conversation_id = message.conversation_id.clone();

        self.timeline.append_incoming(message.clone());
        let increment_unread = !from_self && !active;
        if self.directory.upsert_from_event(&message, increment_unread)
            == UpsertOutcome::UnknownConversation
        {
            // A brand new conversation: re-fetch the directory rather than
            // fabricating a partial entry.
            if let Err(err) = self.directory.refresh().await {
                tracing::warn!(target: "chat::session", error = %err, "directory refresh for new conversation failed");
            }
        }

        if !from_self {
            if !active {
                self.notifier.notify(&sender_name, &content, &conversation_id);
            }
            self.unread.invalidate().await;
        }
    }

    /// Events missed during the outage cannot be replayed, so the view is
    /// rebuilt from authoritative fetches before the session reports Ready.
    async fn reconcile_after_reconnect(&self) {
        self.set_health(SessionHealth::Reconciling);
        tracing::info!(target: "chat::session", "reconnected; reconciling state");
        if let Err(err) = self.directory.refresh().await {
            tracing::warn!(target: "chat::session", error = %err, "conversation reconciliation failed");
        }
        for conversation_id in self.rooms.active() {
            if let Err(err) = self.timeline.reconcile(&conversation_id).await {
                tracing::warn!(
                    target: "chat::session",
                    conversation = %conversation_id,
                    error = %err,
                    "timeline reconciliation failed"
                );
            }
        }
        self.rooms.rejoin_all();
        self.unread.invalidate().await;
        self.set_health(SessionHealth::Ready);
    }

    fn on_link_lost(&self) {
        self.presence.on_disconnect();
        self.typing.clear();
    }

    fn spawn_pump(session: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ServerFrame>();
        {
            let mut subscriptions = session.subscriptions.lock().unwrap();
            for kind in [
                EventKind::NewMessage,
                EventKind::UserOnline,
                EventKind::UserOffline,
                EventKind::UserTyping,
                EventKind::UserStoppedTyping,
            ] {
                let tx = frame_tx.clone();
                let id = session.socket.subscribe(
                    kind,
                    Arc::new(move |frame: &ServerFrame| {
                        let _ = tx.send(frame.clone());
                    }),
                );
                subscriptions.push((kind, id));
            }
        }

        let mut state_rx = session.socket.watch_state();
        let weak = Arc::downgrade(session);
        tokio::spawn(async move {
            // The socket may already be up by the time the pump starts;
            // seed from the current state so the next drop counts as a
            // reconnect, not a first connect.
            let mut last = *state_rx.borrow_and_update();
            let mut ever_connected = last == ConnectionState::Connected;
            if ever_connected {
                if let Some(session) = weak.upgrade() {
                    session.set_health(SessionHealth::Ready);
                }
            }
            loop {
                tokio::select! {
                    maybe_frame = frame_rx.recv() => {
                        let Some(frame) = maybe_frame else { break };
                        let Some(session) = weak.upgrade() else { break };
                        session.handle_frame(frame).await;
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *state_rx.borrow_and_update();
                        let Some(session) = weak.upgrade() else { break };
                        match state {
                            ConnectionState::Connected => {
                                if ever_connected {
                                    session.reconcile_after_reconnect().await;
                                } else {
                                    session.set_health(SessionHealth::Ready);
                                }
                                ever_connected = true;
                            }
                            ConnectionState::Connecting => {
                                if last == ConnectionState::Connected {
                                    session.on_link_lost();
                                }
                                session.set_health(SessionHealth::Connecting);
                            }
                            ConnectionState::Disconnected => {
                                if last == ConnectionState::Connected {
                                    session.on_link_lost();
                                }
                                session.set_health(SessionHealth::Offline);
                            }
                        }
                        last = state;
                    }
                }
            }
        })
    }

    fn spawn_unread_ticker(
        session: &Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(session);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else { break };
                session.unread.refresh().await;
            }
        })
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

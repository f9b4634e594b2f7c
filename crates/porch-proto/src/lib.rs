//! Wire vocabulary shared by the Porch chat transport and REST client.
//!
//! Everything that crosses the websocket or the REST boundary lives in this
//! crate so the transport layer and the sync core cannot drift apart. Socket
//! frames are adjacently tagged JSON (`event` plus `data`) using the server's
//! kebab-case event names; payload fields are camelCase to match the rest of
//! the marketplace API.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const PROTOCOL_VERSION: u8 = 1;

/// One side of a conversation as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantWire {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// The listing a conversation was started from, when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingWire {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Attachment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentWire {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A chat message as delivered by both the REST API and the `new-message`
/// push event. Identity is the server-assigned `id`; duplicate deliveries of
/// the same id must collapse to one entry downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWire {
    pub id: String,
    pub conversation_id: String,
    pub sender: ParticipantWire,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentWire>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationWire {
    pub id: String,
    pub participants: Vec<ParticipantWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageWire>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPageWire {
    pub conversations: Vec<ConversationWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePageWire {
    pub messages: Vec<MessageWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageWire {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationWire {
    pub other_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountWire {
    pub count: u64,
}

/// The `{success, data, message}` envelope every REST endpoint responds with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Frames the client emits over the chat websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStart { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { conversation_id: String },
    Ping,
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn label(&self) -> &'static str {
        match self {
            ClientFrame::JoinConversation { .. } => "join-conversation",
            ClientFrame::LeaveConversation { .. } => "leave-conversation",
            ClientFrame::TypingStart { .. } => "typing-start",
            ClientFrame::TypingStop { .. } => "typing-stop",
            ClientFrame::Ping => "ping",
            ClientFrame::Unknown => "unknown",
        }
    }
}

/// Frames the server pushes to the client.
///
/// `Unknown` absorbs any event name this build does not understand; late or
/// unrecognized deliveries are dropped by the dispatcher, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    NewMessage(MessageWire),
    #[serde(rename_all = "camelCase")]
    UserTyping {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping {
        conversation_id: String,
        user_id: String,
    },
    UserOnline(String),
    UserOffline(String),
    Pong,
    #[serde(other)]
    Unknown,
}

/// Subscription key for the transport's handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    UserTyping,
    UserStoppedTyping,
    UserOnline,
    UserOffline,
    Pong,
    Unknown,
}

impl ServerFrame {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerFrame::NewMessage(_) => EventKind::NewMessage,
            ServerFrame::UserTyping { .. } => EventKind::UserTyping,
            ServerFrame::UserStoppedTyping { .. } => EventKind::UserStoppedTyping,
            ServerFrame::UserOnline(_) => EventKind::UserOnline,
            ServerFrame::UserOffline(_) => EventKind::UserOffline,
            ServerFrame::Pong => EventKind::Pong,
            ServerFrame::Unknown => EventKind::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(WireError::Encode)
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(WireError::Encode)
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

//! Domain types the stores hold, converted from wire DTOs at the boundary.

use porch_proto::{
    AttachmentWire, ConversationWire, ListingWire, MessageKind, MessageWire, ParticipantWire,
};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl From<ParticipantWire> for Participant {
    fn from(wire: ParticipantWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            avatar_url: wire.avatar_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRef {
    pub id: String,
    pub title: String,
}

impl From<ListingWire> for ListingRef {
    fn from(wire: ListingWire) -> Self {
        Self {
            id: wire.id,
            title: wire.title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl From<AttachmentWire> for Attachment {
    fn from(wire: AttachmentWire) -> Self {
        Self {
            url: wire.url,
            file_name: wire.file_name,
            mime_type: wire.mime_type,
        }
    }
}

/// Immutable once created; identity is the server-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: Participant,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub created_at: OffsetDateTime,
}

impl From<MessageWire> for Message {
    fn from(wire: MessageWire) -> Self {
        Self {
            id: wire.id,
            conversation_id: wire.conversation_id,
            sender: wire.sender.into(),
            content: wire.content,
            kind: wire.kind,
            attachments: wire.attachments.into_iter().map(Attachment::from).collect(),
            created_at: wire.created_at,
        }
    }
}

/// The directory's cached view of a conversation's newest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: OffsetDateTime,
}

impl MessagePreview {
    pub fn of(message: &Message) -> Self {
        Self {
            sender_id: message.sender.id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            created_at: message.created_at,
        }
    }
}

impl From<MessageWire> for MessagePreview {
    fn from(wire: MessageWire) -> Self {
        Self {
            sender_id: wire.sender.id,
            content: wire.content,
            kind: wire.kind,
            created_at: wire.created_at,
        }
    }
}

/// A two-party thread, optionally tied to a listing. Never deleted locally;
/// unread counts are non-negative by construction and reset only through an
/// explicit mark-read transition or a fresh server value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<Participant>,
    pub listing: Option<ListingRef>,
    pub last_message: Option<MessagePreview>,
    pub last_message_at: Option<OffsetDateTime>,
    pub unread_count: u64,
}

impl Conversation {
    /// The participant who is not the signed-in user.
    pub fn counterpart(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id != user_id)
    }
}

impl From<ConversationWire> for Conversation {
    fn from(wire: ConversationWire) -> Self {
        let last_message_at = wire
            .last_message_at
            .or_else(|| wire.last_message.as_ref().map(|m| m.created_at));
        Self {
            id: wire.id,
            participants: wire
                .participants
                .into_iter()
                .map(Participant::from)
                .collect(),
            listing: wire.listing.map(ListingRef::from),
            last_message: wire.last_message.map(MessagePreview::from),
            last_message_at,
            unread_count: wire.unread_count,
        }
    }
}

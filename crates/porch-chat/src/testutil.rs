//! Shared test fixtures: a scripted `ChatApi` with per-endpoint call
//! counters, plus wire-payload builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use porch_proto::{
    ConversationPageWire, ConversationWire, CreateConversationWire, MessageKind, MessagePageWire,
    MessageWire, ParticipantWire, SendMessageWire, UnreadCountWire,
};
use time::OffsetDateTime;

use crate::rest::{ApiError, ChatApi};

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

#[derive(Default)]
pub struct MockChatApi {
    pub conversations: Mutex<Vec<ConversationWire>>,
    /// Full per-conversation history, ascending by creation time. Pagination
    /// is emulated the way the server does it: page 1 is the newest slice.
    pub messages: Mutex<HashMap<String, Vec<MessageWire>>>,
    pub unread: AtomicU64,
    pub sender: Mutex<Option<ParticipantWire>>,
    pub next_message_id: AtomicUsize,
    pub fail_conversations: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_unread: AtomicBool,
    pub conversations_calls: AtomicUsize,
    pub messages_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
    pub unread_calls: AtomicUsize,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_conversations(&self, conversations: Vec<ConversationWire>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn set_messages(&self, conversation_id: &str, history: Vec<MessageWire>) {
        self.messages
            .lock()
            .unwrap()
            .insert(conversation_id.into(), history);
    }

    pub fn set_sender(&self, sender: ParticipantWire) {
        *self.sender.lock().unwrap() = Some(sender);
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn conversations(
        &self,
        _page: u32,
        _limit: u32,
    ) -> Result<ConversationPageWire, ApiError> {
        self.conversations_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected("conversation fetch unavailable".into()));
        }
        Ok(ConversationPageWire {
            conversations: self.conversations.lock().unwrap().clone(),
        })
    }

    async fn messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePageWire, ApiError> {
        self.messages_calls.fetch_add(1, Ordering::SeqCst);
        let history = self.messages.lock().unwrap();
        let all = history.get(conversation_id).cloned().unwrap_or_default();
        let limit = limit as usize;
        let skip_from_end = (page.saturating_sub(1) as usize) * limit;
        let end = all.len().saturating_sub(skip_from_end);
        let start = end.saturating_sub(limit);
        Ok(MessagePageWire {
            messages: all[start..end].to_vec(),
        })
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageWire,
    ) -> Result<MessageWire, ApiError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected("send unavailable".into()));
        }
        let n = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sender = self
            .sender
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| participant("self", "Self"));
        let last_ts = {
            let history = self.messages.lock().unwrap();
            history
                .get(conversation_id)
                .and_then(|m| m.last())
                .map(|m| m.created_at.unix_timestamp())
                .unwrap_or(1_700_000_000)
        };
        let message = MessageWire {
            id: format!("sent-{n}"),
            conversation_id: conversation_id.into(),
            sender,
            content: request.content.clone(),
            kind: request.kind,
            attachments: request.attachments.clone(),
            created_at: OffsetDateTime::from_unix_timestamp(last_ts + 1).unwrap(),
        };
        self.messages
            .lock()
            .unwrap()
            .entry(conversation_id.into())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, _conversation_id: &str) -> Result<(), ApiError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        self.unread.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn unread_count(&self) -> Result<UnreadCountWire, ApiError> {
        self.unread_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unread.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected("unread count unavailable".into()));
        }
        Ok(UnreadCountWire {
            count: self.unread.load(Ordering::SeqCst),
        })
    }

    async fn create_or_get_conversation(
        &self,
        request: &CreateConversationWire,
    ) -> Result<ConversationWire, ApiError> {
        let conversations = self.conversations.lock().unwrap();
        conversations
            .iter()
            .find(|c| c.participants.iter().any(|p| p.id == request.other_user_id))
            .cloned()
            .ok_or_else(|| ApiError::Rejected("no such counterpart".into()))
    }
}

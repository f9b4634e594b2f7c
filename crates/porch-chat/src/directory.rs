//! The authoritative client-side list of the signed-in user's conversations.
//!
//! State is reconciled from two sources: REST fetches, which replace the
//! local page wholesale, and push events, which upsert the owning entry.
//! A push for a conversation we have never seen is reported back to the
//! caller so it can trigger a full refresh; the directory never fabricates
//! a partial entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{Conversation, Message, MessagePreview};
use crate::rest::{ApiError, ChatApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Applied,
    /// The owning conversation is not known locally; the caller must
    /// re-fetch the directory instead of constructing partial state.
    UnknownConversation,
}

#[derive(Default)]
struct DirectoryState {
    entries: HashMap<String, Conversation>,
    order: Vec<String>,
}

impl DirectoryState {
    fn resort(&mut self) {
        let entries = &self.entries;
        self.order.sort_by(|a, b| {
            let at = entries.get(a).and_then(|c| c.last_message_at);
            let bt = entries.get(b).and_then(|c| c.last_message_at);
            bt.cmp(&at).then_with(|| a.cmp(b))
        });
    }

    fn replace(&mut self, conversations: Vec<Conversation>) {
        self.entries.clear();
        self.order.clear();
        for conversation in conversations {
            self.order.push(conversation.id.clone());
            self.entries.insert(conversation.id.clone(), conversation);
        }
        self.resort();
    }
}

pub struct ConversationDirectory {
    api: Arc<dyn ChatApi>,
    page_size: u32,
    state: RwLock<DirectoryState>,
}

impl ConversationDirectory {
    pub fn new(api: Arc<dyn ChatApi>, page_size: u32) -> Self {
        Self {
            api,
            page_size,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    /// Fetches the first page and replaces local state with it. Used on
    /// mount, on window refocus, and during reconnect reconciliation; a
    /// failed fetch leaves the previous state untouched.
    pub async fn refresh(&self) -> Result<Vec<Conversation>, ApiError> {
        self.list(1).await
    }

    /// REST-backed page fetch. Page 1 replaces local state wholesale; later
    /// pages extend it while the user scrolls back through older threads.
    pub async fn list(&self, page: u32) -> Result<Vec<Conversation>, ApiError> {
        let fetched = self.api.conversations(page, self.page_size).await?;
        let conversations: Vec<Conversation> = fetched
            .conversations
            .into_iter()
            .map(Conversation::from)
            .collect();
        let mut state = self.state.write().unwrap();
        if page <= 1 {
            state.replace(conversations);
        } else {
            for conversation in conversations {
                if !state.entries.contains_key(&conversation.id) {
                    state.order.push(conversation.id.clone());
                }
                state
                    .entries
                    .insert(conversation.id.clone(), conversation);
            }
            state.resort();
        }
        tracing::debug!(
            target: "chat::directory",
            page,
            count = state.order.len(),
            "reconciled conversation directory from fetch"
        );
        Ok(self.snapshot_locked(&state))
    }

    /// Applies an inbound or outbound message push to the owning entry.
    pub fn upsert_from_event(&self, message: &Message, increment_unread: bool) -> UpsertOutcome {
        let mut state = self.state.write().unwrap();
        let applied = match state.entries.get_mut(&message.conversation_id) {
            Some(conversation) => {
                conversation.last_message = Some(MessagePreview::of(message));
                conversation.last_message_at = Some(message.created_at);
                if increment_unread {
                    conversation.unread_count += 1;
                }
                true
            }
            None => false,
        };
        if applied {
            state.resort();
            UpsertOutcome::Applied
        } else {
            tracing::debug!(
                target: "chat::directory",
                conversation = %message.conversation_id,
                "push event for unknown conversation"
            );
            UpsertOutcome::UnknownConversation
        }
    }

    /// Zeroes a conversation's unread count after a successful mark-read.
    pub fn mark_read_local(&self, conversation_id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        match state.entries.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces a single conversation, used when the server
    /// answers a get-or-create call.
    pub fn upsert_conversation(&self, conversation: Conversation) {
        let mut state = self.state.write().unwrap();
        if !state.entries.contains_key(&conversation.id) {
            state.order.push(conversation.id.clone());
        }
        state
            .entries
            .insert(conversation.id.clone(), conversation);
        state.resort();
    }

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.state
            .read()
            .unwrap()
            .entries
            .get(conversation_id)
            .cloned()
    }

    /// Conversations ordered by most recent activity.
    pub fn snapshot(&self) -> Vec<Conversation> {
        let state = self.state.read().unwrap();
        self.snapshot_locked(&state)
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.entries.clear();
        state.order.clear();
    }

    fn snapshot_locked(&self, state: &DirectoryState) -> Vec<Conversation> {
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect()
    }
}

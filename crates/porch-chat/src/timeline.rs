//! Per-conversation ordered message logs.
//!
//! Identity is the server-assigned message id and it is the only dedup key:
//! an optimistic-free send path plus push delivery means the same message
//! can arrive twice in either order, and both paths merge through
//! [`MessageTimeline::append_incoming`]. Ordering is by creation timestamp
//! with insertion order breaking ties.
//!
//! Resets are epoch guarded: a page fetch started before a reset resolves
//! against a stale epoch and is discarded, so an unmounted view can never
//! write into a log that has been replaced underneath it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use porch_proto::{AttachmentWire, MessageKind, SendMessageWire};

use crate::model::{Attachment, Message};
use crate::rest::{ApiError, ChatApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The id is already present; duplicate delivery collapses to a no-op.
    Duplicate,
}

#[derive(Default)]
struct ConversationLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
    epoch: u64,
    has_more: bool,
}

impl ConversationLog {
    fn insert_unique(&mut self, message: Message) -> AppendOutcome {
        if self.ids.contains(&message.id) {
            tracing::trace!(
                target: "chat::timeline",
                message = %message.id,
                "duplicate delivery collapsed"
            );
            return AppendOutcome::Duplicate;
        }
        let position = self
            .messages
            .partition_point(|existing| existing.created_at <= message.created_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(position, message);
        AppendOutcome::Inserted
    }
}

pub struct MessageTimeline {
    api: Arc<dyn ChatApi>,
    page_size: u32,
    logs: RwLock<HashMap<String, ConversationLog>>,
}

impl MessageTimeline {
    pub fn new(api: Arc<dyn ChatApi>, page_size: u32) -> Self {
        Self {
            api,
            page_size,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches one page of history and merges it in. Page 1 is the most
    /// recent slice; higher pages walk backward. Returns the number of
    /// messages actually inserted; a full page signals more history may
    /// exist (see [`MessageTimeline::has_more`]).
    pub async fn load_page(&self, conversation_id: &str, page: u32) -> Result<usize, ApiError> {
        let epoch = {
            let logs = self.logs.read().unwrap();
            logs.get(conversation_id).map(|log| log.epoch).unwrap_or(0)
        };
        let fetched = self
            .api
            .messages(conversation_id, page, self.page_size)
            .await?;
        Ok(self.merge_page(conversation_id, epoch, fetched.messages))
    }

    /// Merges a resolved page fetch, unless the log was reset while the
    /// fetch was in flight.
    fn merge_page(
        &self,
        conversation_id: &str,
        epoch: u64,
        messages: Vec<porch_proto::MessageWire>,
    ) -> usize {
        let full_page = messages.len() as u32 == self.page_size;
        let mut logs = self.logs.write().unwrap();
        let log = logs.entry(conversation_id.to_string()).or_default();
        if log.epoch != epoch {
            tracing::debug!(
                target: "chat::timeline",
                conversation = conversation_id,
                "discarding page load that resolved after a reset"
            );
            return 0;
        }
        let mut inserted = 0;
        for wire in messages {
            if log.insert_unique(Message::from(wire)) == AppendOutcome::Inserted {
                inserted += 1;
            }
        }
        log.has_more = full_page;
        inserted
    }

    /// Idempotent insert keyed by message id, shared by push delivery and
    /// the REST send echo.
    pub fn append_incoming(&self, message: Message) -> AppendOutcome {
        let mut logs = self.logs.write().unwrap();
        let log = logs.entry(message.conversation_id.clone()).or_default();
        log.insert_unique(message)
    }

    /// Issues the REST send and merges the server-assigned echo through the
    /// dedup rule. There is no optimistic local entry: a failed send changes
    /// nothing and the caller resubmits.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: impl Into<String>,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ApiError> {
        let request = SendMessageWire {
            content: content.into(),
            kind,
            attachments: attachments
                .into_iter()
                .map(|a| AttachmentWire {
                    url: a.url,
                    file_name: a.file_name,
                    mime_type: a.mime_type,
                })
                .collect(),
        };
        let wire = self.api.send_message(conversation_id, &request).await?;
        let message = Message::from(wire);
        self.append_incoming(message.clone());
        Ok(message)
    }

    /// Ordered snapshot of one conversation's log.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.logs
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, conversation_id: &str, message_id: &str) -> bool {
        self.logs
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|log| log.ids.contains(message_id))
            .unwrap_or(false)
    }

    pub fn has_more(&self, conversation_id: &str) -> bool {
        self.logs
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|log| log.has_more)
            .unwrap_or(false)
    }

    /// Drops a conversation's log and bumps its epoch so in-flight page
    /// loads for the old view are discarded when they resolve.
    pub fn reset(&self, conversation_id: &str) {
        let mut logs = self.logs.write().unwrap();
        let log = logs.entry(conversation_id.to_string()).or_default();
        log.epoch += 1;
        log.messages.clear();
        log.ids.clear();
        log.has_more = false;
    }

    /// Replaces a conversation's log with a fresh first page. Used after a
    /// reconnect, when pushed events may have been missed.
    pub async fn reconcile(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.reset(conversation_id);
        self.load_page(conversation_id, 1).await?;
        Ok(())
    }

    pub fn clear_all(&self) {
        self.logs.write().unwrap().clear();
    }
}

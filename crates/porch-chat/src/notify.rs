//! Notification collaborator. The core decides when a message deserves a
//! system-level notification (it arrived for a conversation that is not
//! currently on screen); the host application decides how to render it.

pub trait Notifier: Send + Sync {
    fn notify(&self, sender_name: &str, content: &str, conversation_id: &str);
}

/// Default collaborator for hosts that do not surface notifications.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _sender_name: &str, _content: &str, _conversation_id: &str) {}
}

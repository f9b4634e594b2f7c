//! Online and typing state for counterpart users.
//!
//! The online set is mutated only by `user-online` / `user-offline` events;
//! there is no polling. What happens to it on disconnect is a product
//! decision surfaced as [`PresencePolicy`]: the source behavior retains
//! entries until explicit offline events arrive, at the risk of stale
//! "online" dots during an outage.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Disconnect policy for the online set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresencePolicy {
    /// Keep entries until explicit offline events arrive.
    #[default]
    Retain,
    /// Treat everyone as unknown the moment the transport drops.
    ClearOnDisconnect,
}

pub struct PresenceTracker {
    policy: PresencePolicy,
    online: RwLock<HashSet<String>>,
}

impl PresenceTracker {
    pub fn new(policy: PresencePolicy) -> Self {
        Self {
            policy,
            online: RwLock::new(HashSet::new()),
        }
    }

    pub fn set_online(&self, user_id: &str) {
        self.online.write().unwrap().insert(user_id.to_string());
    }

    pub fn set_offline(&self, user_id: &str) {
        self.online.write().unwrap().remove(user_id);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.read().unwrap().contains(user_id)
    }

    pub fn online_users(&self) -> HashSet<String> {
        self.online.read().unwrap().clone()
    }

    /// Applies the configured policy when the transport drops.
    pub fn on_disconnect(&self) {
        if self.policy == PresencePolicy::ClearOnDisconnect {
            let mut online = self.online.write().unwrap();
            if !online.is_empty() {
                tracing::debug!(
                    target: "chat::presence",
                    cleared = online.len(),
                    "clearing online set on disconnect"
                );
                online.clear();
            }
        }
    }

    pub fn clear(&self) {
        self.online.write().unwrap().clear();
    }
}

/// Who is typing in which conversation. Typing state is ephemeral: it is
/// dropped wholesale whenever the transport disconnects.
pub struct TypingTracker {
    typing: RwLock<HashMap<String, HashSet<String>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self {
            typing: RwLock::new(HashMap::new()),
        }
    }

    pub fn start(&self, conversation_id: &str, user_id: &str) {
        self.typing
            .write()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn stop(&self, conversation_id: &str, user_id: &str) {
        let mut typing = self.typing.write().unwrap();
        if let Some(users) = typing.get_mut(conversation_id) {
            users.remove(user_id);
            if users.is_empty() {
                typing.remove(conversation_id);
            }
        }
    }

    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.typing
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|users| {
                let mut users: Vec<String> = users.iter().cloned().collect();
                users.sort();
                users
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.typing.write().unwrap().clear();
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

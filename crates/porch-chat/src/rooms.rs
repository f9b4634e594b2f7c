//! Room membership: which conversations this client is actively watching.
//!
//! Membership is reference counted so two surfaces showing the same
//! conversation (sidebar widget plus full window) overlap safely: the
//! `join-conversation` frame goes out on the 0 to 1 transition and
//! `leave-conversation` on 1 to 0. While the transport is down the counts
//! still move but nothing is emitted; `rejoin_all` restores server-side
//! membership after a reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use porch_proto::ClientFrame;

use crate::transport::SocketManager;

pub struct RoomMembership {
    socket: Arc<SocketManager>,
    joined: Mutex<HashMap<String, usize>>,
}

impl RoomMembership {
    pub fn new(socket: Arc<SocketManager>) -> Self {
        Self {
            socket,
            joined: Mutex::new(HashMap::new()),
        }
    }

    pub fn join(&self, conversation_id: &str) {
        let newly_joined = {
            let mut joined = self.joined.lock().unwrap();
            let count = joined.entry(conversation_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if newly_joined {
            tracing::debug!(target: "chat::rooms", conversation = conversation_id, "joining room");
            self.socket.publish(ClientFrame::JoinConversation {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    /// Leaving a conversation that is not joined is a safe no-op.
    pub fn leave(&self, conversation_id: &str) {
        let left = {
            let mut joined = self.joined.lock().unwrap();
            match joined.get_mut(conversation_id) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        joined.remove(conversation_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if left {
            tracing::debug!(target: "chat::rooms", conversation = conversation_id, "leaving room");
            self.socket.publish(ClientFrame::LeaveConversation {
                conversation_id: conversation_id.to_string(),
            });
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.joined.lock().unwrap().contains_key(conversation_id)
    }

    pub fn active(&self) -> Vec<String> {
        let mut active: Vec<String> = self.joined.lock().unwrap().keys().cloned().collect();
        active.sort();
        active
    }

    /// Re-issues `join-conversation` for every active room. Called after a
    /// reconnect, when the server has forgotten this client's memberships.
    pub fn rejoin_all(&self) {
        for conversation_id in self.active() {
            tracing::debug!(
                target: "chat::rooms",
                conversation = %conversation_id,
                "rejoining room after reconnect"
            );
            self.socket.publish(ClientFrame::JoinConversation { conversation_id });
        }
    }

    pub fn clear(&self) {
        self.joined.lock().unwrap().clear();
    }
}

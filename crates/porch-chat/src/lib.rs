//! Client-side conversation synchronization core for Porch messaging.
//!
//! One signed-in user, one persistent websocket, one REST client, and a set
//! of stores (conversations, message timelines, presence, unread) that every
//! mounted UI surface reads from. Surfaces never mutate stores directly;
//! they call the contracted operations and observe the results.
//!
//! The entry point is [`session::ChatSession`], constructed once per
//! authenticated session via [`session::ChatSession::init`] and torn down on
//! logout.

pub mod config;
pub mod directory;
pub mod model;
pub mod notify;
pub mod presence;
pub mod rest;
pub mod rooms;
pub mod session;
pub mod timeline;
pub mod transport;
pub mod unread;

pub use config::{ChatConfig, ConfigError};
pub use directory::{ConversationDirectory, UpsertOutcome};
pub use model::{Attachment, Conversation, ListingRef, Message, MessagePreview, Participant};
pub use notify::{Notifier, NoopNotifier};
pub use presence::{PresencePolicy, PresenceTracker, TypingTracker};
pub use rest::{ApiError, ChatApi, ReqwestChatApi};
pub use rooms::RoomMembership;
pub use session::{ChatSession, SessionError, SessionHealth, SessionIdentity};
pub use timeline::{AppendOutcome, MessageTimeline};
pub use transport::{ConnectionState, Credential, SocketConfig, SocketManager, TransportError};
pub use unread::UnreadCounter;

#[cfg(test)]
pub(crate) mod testutil;

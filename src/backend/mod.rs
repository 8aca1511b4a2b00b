/// Backend adapter boundary.
///
/// The gateway treats the messaging backend as an external collaborator
/// reached through a narrow surface: an initial snapshot of users and
/// conversations, a stream of [`BackendEvent`]s, and a send operation. The
/// backend's own authentication and sync protocol live on the far side of
/// this boundary and are not reimplemented here.
pub mod socket;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stable backend user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Stable backend conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ConvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A backend user, read-only from the gateway's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name; nicknames are derived from it.
    pub full_name: String,
    /// Per-backend chat identifier, used to build hostmasks.
    pub chat_id: String,
}

/// A backend conversation, read-only from the gateway's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConvId,
    /// Display name; channel names are derived from it.
    pub name: String,
    /// Ordered member list.
    pub members: Vec<UserId>,
}

/// The backend's initial state, delivered once after it connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The backend account the gateway is signed in as.
    pub self_user: UserId,
    pub users: Vec<User>,
    pub conversations: Vec<Conversation>,
}

/// Events the backend emits after the snapshot.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A chat message arrived in a conversation (echoes of our own sends
    /// included — the gateway suppresses those per session).
    ChatMessage {
        conversation: ConvId,
        sender: UserId,
        text: String,
    },
    /// A conversation appeared that was not in the snapshot.
    ConversationAdded(Conversation),
}

/// Backend connection/handshake failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("backend refused the session: {0}")]
    Rejected(String),
    #[error("malformed backend handshake: {0}")]
    Handshake(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Message send failure. Surfaced as a logged warning only — the line
/// protocol has no reliable NACK channel for the client.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("backend connection lost")]
    Disconnected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Send-side handle shared by all sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deliver `text` to the given conversation.
    async fn send_message(&self, conversation: &ConvId, text: &str) -> Result<(), SendError>;
}

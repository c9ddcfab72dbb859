use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::time::{flexible, flexible_option, null_as_empty};

pub type UserId = i64;
pub type MessageId = i64;

/// A direct message between two users. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Chronological order with the id as tie-break.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }

    /// The counterpart of `local` in this message's conversation.
    pub fn peer_of(&self, local: UserId) -> UserId {
        if self.from == local { self.to } else { self.from }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
}

impl OnlineStatus {
    pub fn is_online(self) -> bool {
        self == OnlineStatus::Online
    }

    pub fn label(self) -> &'static str {
        match self {
            OnlineStatus::Online => "online",
            OnlineStatus::Offline => "offline",
        }
    }
}

/// A chat-capable counterpart of the local user. Lives for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: UserId,
    pub display_name: String,
    pub online_status: OnlineStatus,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Row of the peer-list endpoint. Status is never taken from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, with = "flexible_option")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One page of conversation history, newest first as the server sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: UserId,
    pub username: String,
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::time::null_as_empty;
use super::types::{ChatMessage, OnlineStatus, UserId};

/// Opaque body of an activity broadcast; only non-chat views interpret it.
pub type ActivityPayload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Event pushed by the server over the shared socket, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, deserialize_with = "null_as_empty")]
        online_users: Vec<OnlineUser>,
    },
    Presence {
        user_id: UserId,
        status: OnlineStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
    Message(ChatMessage),
    PostCreated(ActivityPayload),
    PostReaction(ActivityPayload),
    CommentCreated(ActivityPayload),
    CommentReaction(ActivityPayload),
    Error {
        #[serde(default)]
        message: String,
    },
    UserCreated {
        user_id: UserId,
        username: String,
    },
}

impl InboundEvent {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Init { .. } => "init",
            InboundEvent::Presence { .. } => "presence",
            InboundEvent::Message(_) => "message",
            InboundEvent::PostCreated(_) => "post_created",
            InboundEvent::PostReaction(_) => "post_reaction",
            InboundEvent::CommentCreated(_) => "comment_created",
            InboundEvent::CommentReaction(_) => "comment_reaction",
            InboundEvent::Error { .. } => "error",
            InboundEvent::UserCreated { .. } => "user_created",
        }
    }

    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            InboundEvent::PostCreated(_)
                | InboundEvent::PostReaction(_)
                | InboundEvent::CommentCreated(_)
                | InboundEvent::CommentReaction(_)
        )
    }
}

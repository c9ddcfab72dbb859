use serde::{Deserialize, Serialize};

use super::types::UserId;

/// Event written by the client to the shared socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message { to: UserId, content: String },
}

impl OutboundEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

use crate::common::{MessageId, UserId};

/// Last message a local user has read in the conversation with `peer_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMarker {
    pub local_user_id: UserId,
    pub peer_id: UserId,
    pub last_read_message_id: MessageId,
    pub updated_at: i64,
}

pub mod commands;
pub mod events;
pub mod time;
pub mod types;

pub use commands::OutboundEvent;
pub use events::{ActivityPayload, InboundEvent, OnlineUser};
pub use types::{
    ChatMessage, HistoryPage, LocalUser, MessageId, OnlineStatus, Peer, PeerSummary, UserId,
};

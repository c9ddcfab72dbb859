pub mod activity;
pub mod controller;
pub mod conversation;
pub mod presence;
pub mod session;
pub mod unread;
pub mod view;

pub use activity::ActivityFeed;
pub use controller::{ChatController, ChatUpdate, ControllerSettings};
pub use conversation::{Conversation, ConversationStore, PageOutcome, PendingMessage, PendingState};
pub use presence::{DeltaOutcome, PeerRoster};
pub use session::ChatSession;
pub use unread::UnreadTracker;
pub use view::{ScrollAnchor, ScrollHint, ViewPhase, ViewState, Viewport};

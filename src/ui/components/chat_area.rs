use crate::chat::{PendingMessage, PendingState};
use crate::common::{ChatMessage, UserId};

/// Transcript lines: delivered history first, then our unconfirmed sends.
pub fn render(
    messages: &[ChatMessage],
    pending: &[PendingMessage],
    local: UserId,
    peer_name: &str,
) -> Vec<String> {
    let mut lines: Vec<String> = messages
        .iter()
        .map(|message| {
            let author = if message.from == local { "you" } else { peer_name };
            format!(
                "[{}] {author}: {}",
                message.created_at.format("%Y-%m-%d %H:%M"),
                message.content
            )
        })
        .collect();

    lines.extend(pending.iter().map(|pending| match pending.state {
        PendingState::Sending => format!("[sending] you: {}", pending.content),
        PendingState::Failed => format!(
            "[failed] you: {}  (/retry {})",
            pending.content, pending.local_id
        ),
    }));
    lines
}

use std::collections::HashMap;

use crate::common::{ChatMessage, MessageId, UserId};
use crate::storage::WatermarkStore;

/// Per-peer unread counters and durable last-read watermarks of one local user.
pub struct UnreadTracker {
    local_user: UserId,
    counts: HashMap<UserId, u32>,
    watermarks: HashMap<UserId, MessageId>,
    /// Newest message id each peer has pushed to us this session.
    latest_from: HashMap<UserId, MessageId>,
    store: Box<dyn WatermarkStore>,
}

impl UnreadTracker {
    /// Reads the stored watermarks of `local_user`. A store that cannot be read is logged
    /// and treated as empty; tracking still works for the session.
    pub fn load(local_user: UserId, store: Box<dyn WatermarkStore>) -> Self {
        let watermarks = match store.load(local_user) {
            Ok(watermarks) => {
                log::debug!("Loaded {} read markers for user {local_user}", watermarks.len());
                watermarks
            }
            Err(err) => {
                log::error!("Failed to load read markers for user {local_user}: {err}");
                HashMap::new()
            }
        };

        Self {
            local_user,
            counts: HashMap::new(),
            watermarks,
            latest_from: HashMap::new(),
            store,
        }
    }

    /// A message authored by `peer` arrived while its conversation was not being looked at.
    pub fn increment(&mut self, peer: UserId, message_id: MessageId) -> u32 {
        self.note_arrival(peer, message_id);
        let count = self.counts.entry(peer).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Records a message from `peer` without counting it as unread.
    pub fn note_arrival(&mut self, peer: UserId, message_id: MessageId) {
        let latest = self.latest_from.entry(peer).or_insert(message_id);
        if message_id > *latest {
            *latest = message_id;
        }
    }

    /// Zeroes the counter and advances the watermark to the newest message `peer` wrote,
    /// falling back to the newest message overall. The watermark never moves backwards and
    /// is persisted before returning.
    pub fn mark_read(&mut self, peer: UserId, messages: &[ChatMessage]) -> Option<MessageId> {
        self.counts.insert(peer, 0);

        let from_history = read_candidate(peer, messages);
        let from_pushes = self.latest_from.get(&peer).copied();
        let candidate = match (from_history, from_pushes) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(candidate) = candidate {
            let current = self.watermarks.get(&peer).copied();
            if current.is_none_or(|current| candidate > current) {
                self.watermarks.insert(peer, candidate);
                if let Err(err) = self.store.save(self.local_user, peer, candidate) {
                    log::error!("Failed to persist read marker for peer {peer}: {err}");
                }
            }
        }

        self.watermark(peer)
    }

    /// Recomputes the counter of `peer` from loaded history and the stored watermark.
    pub fn reconcile(&mut self, peer: UserId, messages: &[ChatMessage]) -> u32 {
        let watermark = self.watermark(peer).unwrap_or(0);
        let unread = messages
            .iter()
            .filter(|message| message.from == peer && message.id > watermark)
            .count();
        let unread = u32::try_from(unread).unwrap_or(u32::MAX);
        self.counts.insert(peer, unread);
        unread
    }

    pub fn count(&self, peer: UserId) -> u32 {
        self.counts.get(&peer).copied().unwrap_or(0)
    }

    pub fn watermark(&self, peer: UserId) -> Option<MessageId> {
        self.watermarks.get(&peer).copied()
    }

    pub fn total_unread(&self) -> u32 {
        self.counts.values().fold(0u32, |total, count| total.saturating_add(*count))
    }

    /// What the global badge shows: the total while the chat widget is hidden, nothing otherwise.
    pub fn badge_count(&self, widget_visible: bool) -> Option<u32> {
        let total = self.total_unread();
        (!widget_visible && total > 0).then_some(total)
    }
}

/// Highest id written by `peer`; the newest id overall when the peer has not written yet.
fn read_candidate(peer: UserId, messages: &[ChatMessage]) -> Option<MessageId> {
    messages
        .iter()
        .filter(|message| message.from == peer)
        .map(|message| message.id)
        .max()
        .or_else(|| messages.iter().map(|message| message.id).max())
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::{ChatMessage, HistoryPage, MessageId, UserId};
use crate::error::FetchError;

/// Ticket for one in-flight history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub peer: UserId,
    pub offset: usize,
    pub reset: bool,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Applied { added: usize, reset: bool },
    /// The conversation moved on while the fetch was in flight; nothing was merged.
    Stale,
    /// No fetch was started: one is already in flight or there is nothing left to page.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Sending,
    Failed,
}

/// An outgoing message shown before the server echoes it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: Uuid,
    pub content: String,
    pub queued_at: DateTime<Utc>,
    pub state: PendingState,
}

/// History with one peer.
///
/// `messages` is kept sorted by `(created_at, id)` and never holds an id twice; `seen`
/// is the set that enforces the latter. Pending sends live in their own list and are never
/// part of `messages`.
#[derive(Debug)]
pub struct Conversation {
    peer: UserId,
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
    next_offset: usize,
    has_more: bool,
    is_loading: bool,
    /// Live messages that arrived while a reset load was in flight.
    live_during_load: Vec<ChatMessage>,
    pending: Vec<PendingMessage>,
}

impl Conversation {
    fn new(peer: UserId) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            seen: HashSet::new(),
            next_offset: 0,
            has_more: true,
            is_loading: false,
            live_during_load: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Inserts a pushed message unless its id was already observed. Returns whether it was added.
    pub fn append_live(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }

        let out_of_order = self
            .messages
            .last()
            .is_some_and(|last| last.sort_key() > message.sort_key());
        if self.is_loading {
            self.live_during_load.push(message.clone());
        }
        self.messages.push(message);
        if out_of_order {
            self.messages.sort_by_key(ChatMessage::sort_key);
        }
        true
    }

    fn merge_page(&mut self, page: HistoryPage, reset: bool) -> usize {
        let fetched = page.messages.len();
        let live = std::mem::take(&mut self.live_during_load);

        if reset {
            self.messages.clear();
            self.seen.clear();
        }

        // Pages arrive newest first.
        let mut added = 0;
        let mut older = Vec::with_capacity(fetched);
        for message in page.messages.into_iter().rev() {
            if self.seen.insert(message.id) {
                older.push(message);
                added += 1;
            }
        }
        older.append(&mut self.messages);
        self.messages = older;

        if reset {
            for message in live {
                if self.seen.insert(message.id) {
                    self.messages.push(message);
                }
            }
        }
        self.messages.sort_by_key(ChatMessage::sort_key);

        self.next_offset = if reset { fetched } else { self.next_offset + fetched };
        self.has_more = page.has_more;
        added
    }

    pub fn queue_pending(&mut self, content: String) -> Uuid {
        let local_id = Uuid::new_v4();
        self.pending.push(PendingMessage {
            local_id,
            content,
            queued_at: Utc::now(),
            state: PendingState::Sending,
        });
        local_id
    }

    /// Drops the oldest pending entry carrying `content`; called when our own message echoes back.
    pub fn reconcile_echo(&mut self, content: &str) -> Option<PendingMessage> {
        let index = self.pending.iter().position(|p| p.content == content)?;
        Some(self.pending.remove(index))
    }

    pub fn fail_pending(&mut self, local_id: Uuid) -> bool {
        match self.pending.iter_mut().find(|p| p.local_id == local_id) {
            Some(pending) => {
                pending.state = PendingState::Failed;
                true
            }
            None => false,
        }
    }

    pub fn fail_oldest_sending(&mut self) -> Option<Uuid> {
        let pending = self
            .pending
            .iter_mut()
            .find(|p| p.state == PendingState::Sending)?;
        pending.state = PendingState::Failed;
        Some(pending.local_id)
    }

    pub fn fail_all_sending(&mut self) -> usize {
        let mut failed = 0;
        for pending in self.pending.iter_mut().filter(|p| p.state == PendingState::Sending) {
            pending.state = PendingState::Failed;
            failed += 1;
        }
        failed
    }

    /// Moves a failed entry back to `Sending` and hands back its content for resending.
    pub fn retry_pending(&mut self, local_id: Uuid) -> Option<String> {
        let pending = self
            .pending
            .iter_mut()
            .find(|p| p.local_id == local_id && p.state == PendingState::Failed)?;
        pending.state = PendingState::Sending;
        pending.queued_at = Utc::now();
        Some(pending.content.clone())
    }
}

/// Owner of the one active conversation.
#[derive(Debug, Default)]
pub struct ConversationStore {
    active: Option<Conversation>,
    generation: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh conversation with `peer`, discarding the previous one.
    pub fn select_peer(&mut self, peer: UserId) -> &mut Conversation {
        self.generation += 1;
        self.active.insert(Conversation::new(peer))
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.active = None;
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Conversation> {
        self.active.as_mut()
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active.as_ref().map(Conversation::peer)
    }

    /// The conversation with `peer`, if it is the active one.
    pub fn for_peer_mut(&mut self, peer: UserId) -> Option<&mut Conversation> {
        self.active.as_mut().filter(|conversation| conversation.peer == peer)
    }

    /// Claims the loading flag for the next page. `None` when a load is already in
    /// flight, when no conversation is open, or when paging back with nothing left.
    pub fn begin_page_load(&mut self, reset: bool) -> Option<PageRequest> {
        let generation = self.generation;
        let conversation = self.active.as_mut()?;
        if conversation.is_loading || (!reset && !conversation.has_more) {
            return None;
        }

        conversation.is_loading = true;
        conversation.live_during_load.clear();
        Some(PageRequest {
            peer: conversation.peer,
            offset: if reset { 0 } else { conversation.next_offset },
            reset,
            generation,
        })
    }

    /// Applies the fetch result for `request`. A failure clears only the loading flag.
    pub fn finish_page_load(
        &mut self,
        request: &PageRequest,
        result: Result<HistoryPage, FetchError>,
    ) -> Result<PageOutcome, FetchError> {
        let conversation = match self.active.as_mut() {
            Some(conversation)
                if self.generation == request.generation && conversation.peer == request.peer =>
            {
                conversation
            }
            _ => {
                log::debug!("Dropping stale history page for peer {}", request.peer);
                return Ok(PageOutcome::Stale);
            }
        };

        conversation.is_loading = false;
        match result {
            Ok(page) => {
                let added = conversation.merge_page(page, request.reset);
                Ok(PageOutcome::Applied {
                    added,
                    reset: request.reset,
                })
            }
            Err(err) => {
                conversation.live_during_load.clear();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use chrono::TimeZone;

    const LOCAL: UserId = 100;

    fn message(id: MessageId, from: UserId, minute: u32) -> ChatMessage {
        ChatMessage {
            id,
            from,
            to: if from == LOCAL { 1 } else { LOCAL },
            content: format!("m{id}"),
            created_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, minute, 0).unwrap(),
        }
    }

    fn page(ids: &[MessageId], has_more: bool) -> HistoryPage {
        HistoryPage {
            messages: ids.iter().map(|&id| message(id, 1, id as u32)).collect(),
            has_more,
        }
    }

    fn ids(conversation: &Conversation) -> Vec<MessageId> {
        conversation.messages().iter().map(|m| m.id).collect()
    }

    fn assert_sorted(conversation: &Conversation) {
        let keys: Vec<_> = conversation.messages().iter().map(ChatMessage::sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn reset_page_is_reversed_into_ascending_order() {
        let mut store = ConversationStore::new();
        store.select_peer(1);

        let request = store.begin_page_load(true).unwrap();
        assert_eq!(request.offset, 0);
        let outcome = store.finish_page_load(&request, Ok(page(&[5, 4], true))).unwrap();

        assert_eq!(outcome, PageOutcome::Applied { added: 2, reset: true });
        let conversation = store.active().unwrap();
        assert_eq!(ids(conversation), vec![4, 5]);
        assert!(conversation.has_more());
        assert_eq!(conversation.next_offset(), 2);
    }

    #[test]
    fn live_duplicate_of_history_is_ignored() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let request = store.begin_page_load(true).unwrap();
        store.finish_page_load(&request, Ok(page(&[5, 4], true))).unwrap();

        let conversation = store.active_mut().unwrap();
        assert!(!conversation.append_live(message(5, 1, 5)));
        assert_eq!(ids(conversation), vec![4, 5]);
    }

    #[test]
    fn older_pages_are_prepended_and_deduplicated() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let first = store.begin_page_load(true).unwrap();
        store.finish_page_load(&first, Ok(page(&[9, 8], true))).unwrap();

        let second = store.begin_page_load(false).unwrap();
        assert_eq!(second.offset, 2);
        // Overlap with the first page after a message was inserted server-side.
        store
            .finish_page_load(&second, Ok(page(&[8, 7, 6], false)))
            .unwrap();

        let conversation = store.active().unwrap();
        assert_eq!(ids(conversation), vec![6, 7, 8, 9]);
        assert_eq!(conversation.next_offset(), 5);
        assert!(!conversation.has_more());
        assert_sorted(conversation);

        assert!(store.begin_page_load(false).is_none());
    }

    #[test]
    fn loads_do_not_overlap() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let request = store.begin_page_load(true).unwrap();
        assert!(store.begin_page_load(false).is_none());
        assert!(store.begin_page_load(true).is_none());
        store.finish_page_load(&request, Ok(page(&[], true))).unwrap();
        assert!(store.begin_page_load(false).is_some());
    }

    #[test]
    fn failure_leaves_pagination_untouched() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let first = store.begin_page_load(true).unwrap();
        store.finish_page_load(&first, Ok(page(&[3, 2], true))).unwrap();

        let second = store.begin_page_load(false).unwrap();
        let err = store
            .finish_page_load(&second, Err(FetchError::from_status(500, "db down")))
            .unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::Server);
        let conversation = store.active().unwrap();
        assert_eq!(conversation.next_offset(), 2);
        assert!(conversation.has_more());
        assert!(!conversation.is_loading());
        assert_eq!(ids(conversation), vec![2, 3]);
    }

    #[test]
    fn result_for_a_previous_peer_is_dropped() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let request = store.begin_page_load(true).unwrap();

        store.select_peer(2);
        let outcome = store.finish_page_load(&request, Ok(page(&[5, 4], true))).unwrap();

        assert_eq!(outcome, PageOutcome::Stale);
        let conversation = store.active().unwrap();
        assert_eq!(conversation.peer(), 2);
        assert!(conversation.messages().is_empty());
    }

    #[test]
    fn reselecting_the_same_peer_also_drops_old_results() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let request = store.begin_page_load(true).unwrap();
        store.select_peer(1);

        assert_eq!(
            store.finish_page_load(&request, Ok(page(&[5], true))).unwrap(),
            PageOutcome::Stale
        );
        assert!(store.active().unwrap().messages().is_empty());
    }

    #[test]
    fn live_messages_survive_a_reset_in_flight() {
        let mut store = ConversationStore::new();
        store.select_peer(1);
        let request = store.begin_page_load(true).unwrap();

        let conversation = store.active_mut().unwrap();
        assert!(conversation.append_live(message(7, 1, 7)));
        assert!(conversation.append_live(message(5, 1, 5)));

        store.finish_page_load(&request, Ok(page(&[5, 4], true))).unwrap();
        let conversation = store.active().unwrap();
        assert_eq!(ids(conversation), vec![4, 5, 7]);
        assert_eq!(conversation.next_offset(), 2);
    }

    #[test]
    fn out_of_order_push_is_resorted() {
        let mut store = ConversationStore::new();
        let conversation = store.select_peer(1);
        conversation.append_live(message(3, 1, 3));
        conversation.append_live(message(1, 1, 1));
        conversation.append_live(message(2, LOCAL, 2));

        assert_eq!(ids(conversation), vec![1, 2, 3]);
    }

    #[test]
    fn same_timestamp_breaks_ties_by_id() {
        let mut store = ConversationStore::new();
        let conversation = store.select_peer(1);
        conversation.append_live(message(11, 1, 0));
        conversation.append_live(message(10, 1, 0));

        assert_eq!(ids(conversation), vec![10, 11]);
    }

    #[test]
    fn pending_lifecycle() {
        let mut store = ConversationStore::new();
        let conversation = store.select_peer(1);
        let first = conversation.queue_pending("hello".into());
        let second = conversation.queue_pending("again".into());

        assert_eq!(conversation.fail_oldest_sending(), Some(first));
        assert_eq!(conversation.fail_all_sending(), 1);
        assert!(conversation.pending().iter().all(|p| p.state == PendingState::Failed));

        assert_eq!(conversation.retry_pending(second), Some("again".to_string()));
        assert_eq!(conversation.retry_pending(second), None);
        assert_eq!(conversation.retry_pending(Uuid::new_v4()), None);

        let echoed = conversation.reconcile_echo("again").unwrap();
        assert_eq!(echoed.local_id, second);
        assert_eq!(conversation.pending().len(), 1);
        assert!(conversation.reconcile_echo("never sent").is_none());
    }
}

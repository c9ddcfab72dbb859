use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::common::{
    ChatMessage, InboundEvent, LocalUser, MessageId, OnlineStatus, OutboundEvent, Peer, UserId,
};
use crate::config::AppConfig;
use crate::error::{ErrorContext, FetchError, HandlerError, LoadFailure, SelectError, SendError};
use crate::network::{ChatApi, ConnectionState, EventHandler, TransportChannel};

use super::conversation::{ConversationStore, PageOutcome, PendingMessage};
use super::presence::{DeltaOutcome, PeerRoster};
use super::unread::UnreadTracker;
use super::view::{
    ScrollAnchor, ScrollHint, ScrollThrottle, Throttled, ViewAction, ViewState, Viewport,
};

/// Change notification for whatever renders the chat.
#[derive(Debug, Clone)]
pub enum ChatUpdate {
    PeersChanged,
    PresenceChanged { peer: UserId, status: OnlineStatus },
    ConversationChanged { peer: UserId, scroll: ScrollHint },
    PendingChanged { peer: UserId },
    UnreadChanged { peer: UserId, count: u32, total: u32 },
    LoadFailed { peer: UserId, failure: LoadFailure },
    Connection(ConnectionState),
    ServerError(String),
    Activity(InboundEvent),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub load_more_threshold_px: f64,
    pub stick_to_bottom_threshold_px: f64,
    pub scroll_throttle: Duration,
    pub update_buffer: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            load_more_threshold_px: config.load_more_threshold_px,
            stick_to_bottom_threshold_px: config.stick_to_bottom_threshold_px,
            scroll_throttle: config.scroll_throttle(),
            update_buffer: config.update_buffer.max(1),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Async work requested while handling a socket event.
#[derive(Debug)]
enum FollowUp {
    RefreshPeers,
    /// Evaluate the scroll position held back by the throttle once `0` is reached.
    TrailingScroll(Instant),
}

struct ChatState {
    roster: PeerRoster,
    conversations: ConversationStore,
    unread: UnreadTracker,
    view: ViewState,
    viewport: Option<Viewport>,
    throttle: ScrollThrottle,
    outbox: Vec<ChatUpdate>,
}

impl ChatState {
    fn apply(&mut self, action: ViewAction) {
        self.view = std::mem::take(&mut self.view).reduce(action);
    }

    fn emit(&mut self, update: ChatUpdate) {
        self.outbox.push(update);
    }

    fn emit_unread(&mut self, peer: UserId) {
        let update = ChatUpdate::UnreadChanged {
            peer,
            count: self.unread.count(peer),
            total: self.unread.total_unread(),
        };
        self.emit(update);
    }

    fn sync_input(&mut self) {
        if let Some(peer) = self.view.active_peer {
            let online = self.roster.is_online(peer);
            self.apply(ViewAction::PresenceChanged { peer, online });
        }
    }

    fn mark_read(&mut self, peer: UserId) {
        let before = (self.unread.count(peer), self.unread.watermark(peer));
        let messages = self
            .conversations
            .active()
            .filter(|conversation| conversation.peer() == peer)
            .map(|conversation| conversation.messages())
            .unwrap_or_default();
        let watermark = self.unread.mark_read(peer, messages);
        if before != (0, watermark) {
            self.emit_unread(peer);
        }
    }

    fn receive_message(&mut self, local: UserId, message: ChatMessage, stick_threshold: f64) {
        if message.from != local && message.to != local {
            log::debug!("Ignoring message {} not addressed to us", message.id);
            return;
        }
        let peer = message.peer_of(local);
        let incoming = message.from == peer;
        let id = message.id;

        if self.roster.touch(peer, message.created_at) {
            self.emit(ChatUpdate::PeersChanged);
        }

        let at_bottom = self
            .viewport
            .is_none_or(|viewport| viewport.near_bottom(stick_threshold));
        let watching = self.view.is_active_and_visible(peer) && at_bottom;

        let (appended, reconciled) = match self.conversations.for_peer_mut(peer) {
            Some(conversation) => {
                let reconciled =
                    !incoming && conversation.reconcile_echo(&message.content).is_some();
                (Some(conversation.append_live(message)), reconciled)
            }
            None => (None, false),
        };
        if reconciled {
            self.emit(ChatUpdate::PendingChanged { peer });
        }

        match appended {
            Some(false) => log::debug!("Message {id} already shown"),
            Some(true) if !incoming => self.emit(ChatUpdate::ConversationChanged {
                peer,
                scroll: ScrollHint::Bottom,
            }),
            Some(true) if watching => {
                self.emit(ChatUpdate::ConversationChanged {
                    peer,
                    scroll: ScrollHint::Bottom,
                });
                self.unread.note_arrival(peer, id);
                self.mark_read(peer);
            }
            Some(true) => {
                self.emit(ChatUpdate::ConversationChanged {
                    peer,
                    scroll: ScrollHint::Keep,
                });
                self.unread.increment(peer, id);
                self.emit_unread(peer);
            }
            None if incoming => {
                self.unread.increment(peer, id);
                self.emit_unread(peer);
            }
            None => {}
        }
    }
}

/// Orchestrates presence, the active conversation and unread state for one local user.
///
/// Registered on the [`TransportChannel`] as an [`EventHandler`]. All state sits behind one
/// mutex that is never held across an await, so pushes, presence deltas and scroll input
/// keep being applied while a history fetch is outstanding.
pub struct ChatController {
    local_user: LocalUser,
    api: Arc<dyn ChatApi>,
    channel: Arc<TransportChannel>,
    settings: ControllerSettings,
    state: Mutex<ChatState>,
    updates: broadcast::Sender<ChatUpdate>,
    follow_up_tx: mpsc::UnboundedSender<FollowUp>,
    follow_up_rx: Mutex<Option<mpsc::UnboundedReceiver<FollowUp>>>,
}

impl ChatController {
    pub fn new(
        local_user: LocalUser,
        api: Arc<dyn ChatApi>,
        channel: Arc<TransportChannel>,
        unread: UnreadTracker,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(settings.update_buffer);
        let (follow_up_tx, follow_up_rx) = mpsc::unbounded_channel();
        let state = ChatState {
            roster: PeerRoster::new(),
            conversations: ConversationStore::new(),
            unread,
            view: ViewState::default(),
            viewport: None,
            throttle: ScrollThrottle::new(settings.scroll_throttle),
            outbox: Vec::new(),
        };

        Arc::new(Self {
            local_user,
            api,
            channel,
            settings,
            state: Mutex::new(state),
            updates,
            follow_up_tx,
            follow_up_rx: Mutex::new(Some(follow_up_rx)),
        })
    }

    /// Runs `f` under the state lock, then publishes what it emitted.
    fn with_state<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut state);
        for update in state.outbox.drain(..) {
            // No subscribers is fine.
            let _ = self.updates.send(update);
        }
        result
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.updates.subscribe()
    }

    pub(crate) fn update_sender(&self) -> broadcast::Sender<ChatUpdate> {
        self.updates.clone()
    }

    pub fn local_user(&self) -> &LocalUser {
        &self.local_user
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub async fn refresh_peers(&self) -> Result<usize, FetchError> {
        let peers = self.api.fetch_peers().await.inspect_err(|err| {
            log::warn!("Failed to load peer list: {err}");
        })?;
        let count = peers.len();

        self.with_state(|state| {
            state.roster.load_peers(peers);
            state.sync_input();
            state.emit(ChatUpdate::PeersChanged);
        });
        log::debug!("Peer list refreshed ({count} peers)");
        Ok(count)
    }

    /// Validates raw user input before anything touches the network.
    pub async fn select_peer_str(&self, raw: &str) -> Result<PageOutcome, SelectError> {
        let peer = raw
            .trim()
            .parse::<UserId>()
            .map_err(|_| SelectError::InvalidPeerId(raw.to_string()))?;
        self.select_peer(peer).await
    }

    pub async fn select_peer(&self, peer: UserId) -> Result<PageOutcome, SelectError> {
        self.with_state(|state| {
            if !state.roster.contains(peer) {
                return Err(SelectError::UnknownPeer(peer));
            }
            let online = state.roster.is_online(peer);
            state.conversations.select_peer(peer);
            state.viewport = None;
            state.apply(ViewAction::PeerSelected { peer, online });
            state.emit(ChatUpdate::PendingChanged { peer });
            Ok(())
        })?;
        log::info!("Opened conversation with peer {peer}");

        Ok(self.load_page(true).await?)
    }

    pub fn close_conversation(&self) {
        self.with_state(|state| {
            state.conversations.clear();
            state.viewport = None;
            state.apply(ViewAction::Cleared);
        });
    }

    /// Fetches the next page for the active conversation; `reset` reloads from the newest.
    pub async fn load_page(&self, reset: bool) -> Result<PageOutcome, FetchError> {
        self.load_page_anchored(reset, None).await
    }

    async fn load_page_anchored(
        &self,
        reset: bool,
        anchor: Option<ScrollAnchor>,
    ) -> Result<PageOutcome, FetchError> {
        let request = self.with_state(|state| {
            let request = state.conversations.begin_page_load(reset)?;
            state.apply(ViewAction::PageRequested);
            Some(request)
        });
        let Some(request) = request else {
            return Ok(PageOutcome::Skipped);
        };

        let result = self.api.fetch_history(request.peer, request.offset).await;

        self.with_state(|state| {
            let peer = request.peer;
            match state.conversations.finish_page_load(&request, result) {
                Ok(PageOutcome::Applied { added, reset }) => {
                    state.apply(ViewAction::PageLoaded);
                    if reset {
                        if state.view.is_active_and_visible(peer) {
                            state.mark_read(peer);
                        } else {
                            let messages = state
                                .conversations
                                .active()
                                .map(|conversation| conversation.messages())
                                .unwrap_or_default();
                            state.unread.reconcile(peer, messages);
                            state.emit_unread(peer);
                        }
                    }
                    let scroll = match (reset, anchor) {
                        (true, _) => ScrollHint::Bottom,
                        (false, Some(anchor)) => ScrollHint::Anchor(anchor),
                        (false, None) => ScrollHint::Keep,
                    };
                    state.emit(ChatUpdate::ConversationChanged { peer, scroll });
                    Ok(PageOutcome::Applied { added, reset })
                }
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    log::warn!("Loading history with peer {peer} failed: {err}");
                    let context = if reset {
                        ErrorContext::Navigation
                    } else {
                        ErrorContext::Action
                    };
                    let failure = err.load_failure(context);
                    state.apply(ViewAction::PageFailed(failure.clone()));
                    state.emit(ChatUpdate::LoadFailed { peer, failure });
                    Err(err)
                }
            }
        })
    }

    /// Scroll input from the renderer. Near the bottom the conversation is marked read;
    /// near the top an older page is loaded and the anchor to restore is returned.
    ///
    /// Events inside the throttle window are held back; the newest one is evaluated by
    /// [`ChatController::run`] when the window closes and its anchor arrives as a
    /// [`ChatUpdate::ConversationChanged`] with [`ScrollHint::Anchor`].
    pub async fn on_scroll(&self, viewport: Viewport) -> Option<ScrollAnchor> {
        let throttled = self.with_state(|state| {
            state.viewport = Some(viewport);
            state.throttle.offer(Instant::now(), viewport)
        });

        match throttled {
            Throttled::Run => self.evaluate_scroll(viewport).await,
            Throttled::Deferred { at } => {
                if let Err(err) = self.request(FollowUp::TrailingScroll(at)) {
                    log::debug!("Dropping held-back scroll: {err}");
                }
                None
            }
            Throttled::Coalesced => None,
        }
    }

    async fn flush_trailing_scroll(&self) {
        let viewport = self.with_state(|state| state.throttle.take_trailing(Instant::now()));
        if let Some(viewport) = viewport {
            self.evaluate_scroll(viewport).await;
        }
    }

    async fn evaluate_scroll(&self, viewport: Viewport) -> Option<ScrollAnchor> {
        let load_more = self.settings.load_more_threshold_px;
        let stick = self.settings.stick_to_bottom_threshold_px;

        let anchor = self.with_state(|state| {
            let peer = state.conversations.active_peer()?;
            if state.view.visible && viewport.near_bottom(stick) {
                state.mark_read(peer);
            }

            let conversation = state.conversations.active()?;
            let wants_more = viewport.near_top(load_more)
                && conversation.has_more()
                && !conversation.is_loading();
            wants_more.then(|| ScrollAnchor::capture(&viewport))
        })?;

        match self.load_page_anchored(false, Some(anchor)).await {
            Ok(PageOutcome::Applied { .. }) => Some(anchor),
            _ => None,
        }
    }

    pub fn set_widget_visible(&self, visible: bool) {
        self.with_state(|state| {
            state.apply(ViewAction::VisibilityChanged(visible));
            if let Some(peer) = state.view.active_peer.filter(|_| visible) {
                state.mark_read(peer);
            }
        });
    }

    pub fn mark_active_read(&self) {
        self.with_state(|state| {
            if let Some(peer) = state.conversations.active_peer() {
                state.mark_read(peer);
            }
        });
    }

    /// Sends `content` to the active peer and shows it as pending until the server echoes it.
    pub fn send_message(&self, content: &str) -> Result<Uuid, SendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }

        self.with_state(|state| {
            let peer = self.ensure_sendable(state)?;
            let conversation = state
                .conversations
                .for_peer_mut(peer)
                .ok_or(SendError::NoActivePeer)?;
            let local_id = conversation.queue_pending(content.to_string());
            let sent = self.channel.send(&OutboundEvent::Message {
                to: peer,
                content: content.to_string(),
            });
            if !sent {
                conversation.fail_pending(local_id);
            }
            state.emit(ChatUpdate::PendingChanged { peer });

            if sent { Ok(local_id) } else { Err(SendError::NotConnected) }
        })
    }

    /// Resends a pending message that previously failed.
    pub fn retry_pending(&self, raw_id: &str) -> Result<(), SendError> {
        let local_id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| SendError::UnknownPending(raw_id.to_string()))?;

        self.with_state(|state| {
            let peer = self.ensure_sendable(state)?;
            let conversation = state
                .conversations
                .for_peer_mut(peer)
                .ok_or(SendError::NoActivePeer)?;
            let content = conversation
                .retry_pending(local_id)
                .ok_or_else(|| SendError::UnknownPending(raw_id.to_string()))?;
            let sent = self
                .channel
                .send(&OutboundEvent::Message { to: peer, content });
            if !sent {
                conversation.fail_pending(local_id);
            }
            state.emit(ChatUpdate::PendingChanged { peer });

            if sent { Ok(()) } else { Err(SendError::NotConnected) }
        })
    }

    fn ensure_sendable(&self, state: &ChatState) -> Result<UserId, SendError> {
        let peer = state.view.active_peer.ok_or(SendError::NoActivePeer)?;
        if !state.view.input_enabled {
            log::debug!("Peer {peer} is not online; send rejected");
            return Err(SendError::InputDisabled);
        }
        if self.channel.state() != ConnectionState::Open {
            return Err(SendError::NotConnected);
        }
        Ok(peer)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.with_state(|state| state.roster.sorted())
    }

    pub fn peer(&self, id: UserId) -> Option<Peer> {
        self.with_state(|state| state.roster.get(id).cloned())
    }

    pub fn view(&self) -> ViewState {
        self.with_state(|state| state.view.clone())
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.with_state(|state| state.conversations.active_peer())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.with_state(|state| {
            state
                .conversations
                .active()
                .map(|conversation| conversation.messages().to_vec())
                .unwrap_or_default()
        })
    }

    pub fn pending(&self) -> Vec<PendingMessage> {
        self.with_state(|state| {
            state
                .conversations
                .active()
                .map(|conversation| conversation.pending().to_vec())
                .unwrap_or_default()
        })
    }

    /// `(has_more, next_offset, is_loading)` of the active conversation.
    pub fn pagination(&self) -> Option<(bool, usize, bool)> {
        self.with_state(|state| {
            state.conversations.active().map(|conversation| {
                (
                    conversation.has_more(),
                    conversation.next_offset(),
                    conversation.is_loading(),
                )
            })
        })
    }

    pub fn unread_count(&self, peer: UserId) -> u32 {
        self.with_state(|state| state.unread.count(peer))
    }

    pub fn total_unread(&self) -> u32 {
        self.with_state(|state| state.unread.total_unread())
    }

    pub fn badge_count(&self) -> Option<u32> {
        self.with_state(|state| state.unread.badge_count(state.view.visible))
    }

    pub fn watermark(&self, peer: UserId) -> Option<MessageId> {
        self.with_state(|state| state.unread.watermark(peer))
    }

    /// Executes follow-up work and tracks the connection until the channel closes.
    pub async fn run(self: Arc<Self>) {
        let receiver = self
            .follow_up_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut follow_ups) = receiver else {
            log::warn!("Chat controller loop is already running");
            return;
        };
        let mut connection = self.channel.subscribe_state();
        let mut trailing_scroll: Option<Instant> = None;

        loop {
            tokio::select! {
                Some(follow_up) = follow_ups.recv() => match follow_up {
                    FollowUp::RefreshPeers => {
                        // Failure is already logged; the next unknown peer retries.
                        let _ = self.refresh_peers().await;
                    }
                    FollowUp::TrailingScroll(at) => {
                        trailing_scroll = Some(trailing_scroll.map_or(at, |due| due.max(at)));
                    }
                },
                _ = scroll_due(trailing_scroll) => {
                    trailing_scroll = None;
                    self.flush_trailing_scroll().await;
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *connection.borrow_and_update();
                    self.on_connection_state(current);
                    if current == ConnectionState::Closed {
                        break;
                    }
                }
                else => break,
            }
        }
        log::debug!("Chat controller loop stopped");
    }

    fn on_connection_state(&self, connection: ConnectionState) {
        self.with_state(|state| {
            if connection == ConnectionState::Disconnected {
                let failed = state
                    .conversations
                    .active_mut()
                    .map(|conversation| (conversation.peer(), conversation.fail_all_sending()));
                if let Some((peer, count)) = failed.filter(|(_, count)| *count > 0) {
                    log::info!("Connection lost; {count} pending message(s) marked failed");
                    state.emit(ChatUpdate::PendingChanged { peer });
                }
            }
            state.emit(ChatUpdate::Connection(connection));
        });
    }

    fn request(&self, follow_up: FollowUp) -> Result<(), HandlerError> {
        self.follow_up_tx
            .send(follow_up)
            .map_err(|err| HandlerError(format!("follow-up queue closed: {err}")))
    }
}

async fn scroll_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl EventHandler for ChatController {
    fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        let local = self.local_user.id;
        match event {
            InboundEvent::Init {
                user_id,
                online_users,
            } => {
                if user_id.is_some_and(|id| id != local) {
                    log::warn!("Socket session belongs to user {user_id:?}, expected {local}");
                }
                self.with_state(|state| {
                    let changed = state
                        .roster
                        .apply_snapshot(online_users.iter().map(|user| user.user_id));
                    for peer in changed {
                        let status = if state.roster.is_online(peer) {
                            OnlineStatus::Online
                        } else {
                            OnlineStatus::Offline
                        };
                        state.emit(ChatUpdate::PresenceChanged { peer, status });
                    }
                    state.sync_input();
                });
                log::debug!("Presence snapshot with {} users", online_users.len());
            }
            InboundEvent::Presence {
                user_id, status, ..
            } => {
                let (peer, status) = (*user_id, *status);
                let outcome = self.with_state(|state| {
                    let outcome = state.roster.apply_delta(peer, status);
                    if outcome == DeltaOutcome::Changed {
                        state.emit(ChatUpdate::PresenceChanged { peer, status });
                        state.apply(ViewAction::PresenceChanged {
                            peer,
                            online: status.is_online(),
                        });
                    }
                    outcome
                });
                if outcome == DeltaOutcome::UnknownPeerOnline && peer != local {
                    log::info!("Unknown user {peer} came online; refreshing peer list");
                    self.request(FollowUp::RefreshPeers)?;
                }
            }
            InboundEvent::Message(message) => {
                let stick = self.settings.stick_to_bottom_threshold_px;
                self.with_state(|state| state.receive_message(local, message.clone(), stick));
            }
            InboundEvent::Error { message } => {
                log::warn!("Server reported an error: {message}");
                self.with_state(|state| {
                    let failed = state
                        .conversations
                        .active_mut()
                        .and_then(|conversation| {
                            conversation.fail_oldest_sending().map(|_| conversation.peer())
                        });
                    if let Some(peer) = failed {
                        state.emit(ChatUpdate::PendingChanged { peer });
                    }
                    state.emit(ChatUpdate::ServerError(message.clone()));
                });
            }
            InboundEvent::UserCreated { user_id, username } if *user_id != local => {
                let (peer, username) = (*user_id, username.clone());
                self.with_state(|state| {
                    if state.roster.add_peer(peer, username) {
                        log::info!("New user {peer} joined");
                    }
                    state.sync_input();
                    state.emit(ChatUpdate::PeersChanged);
                    state.emit(ChatUpdate::PresenceChanged {
                        peer,
                        status: OnlineStatus::Online,
                    });
                });
            }
            _ => {}
        }
        Ok(())
    }
}

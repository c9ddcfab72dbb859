use std::time::Duration;

use tokio::time::Instant;

use crate::common::UserId;
use crate::error::LoadFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    NoPeerSelected,
    Loading,
    Ready,
}

/// Everything the chat widget renders apart from the stores' data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub phase: ViewPhase,
    pub active_peer: Option<UserId>,
    /// Sending is only allowed once the active peer is confirmed online.
    pub input_enabled: bool,
    pub visible: bool,
    pub last_error: Option<LoadFailure>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            phase: ViewPhase::NoPeerSelected,
            active_peer: None,
            input_enabled: false,
            visible: true,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewAction {
    PeerSelected { peer: UserId, online: bool },
    PageRequested,
    PageLoaded,
    PageFailed(LoadFailure),
    PresenceChanged { peer: UserId, online: bool },
    VisibilityChanged(bool),
    Cleared,
}

impl ViewState {
    pub fn reduce(self, action: ViewAction) -> ViewState {
        match action {
            ViewAction::PeerSelected { peer, online } => ViewState {
                phase: ViewPhase::Loading,
                active_peer: Some(peer),
                input_enabled: online,
                last_error: None,
                ..self
            },
            ViewAction::PageRequested if self.active_peer.is_some() => ViewState {
                phase: ViewPhase::Loading,
                ..self
            },
            ViewAction::PageLoaded if self.active_peer.is_some() => ViewState {
                phase: ViewPhase::Ready,
                last_error: None,
                ..self
            },
            ViewAction::PageFailed(error) if self.active_peer.is_some() => ViewState {
                phase: ViewPhase::Ready,
                last_error: Some(error),
                ..self
            },
            ViewAction::PresenceChanged { peer, online } if self.active_peer == Some(peer) => {
                ViewState {
                    input_enabled: online,
                    ..self
                }
            }
            ViewAction::VisibilityChanged(visible) => ViewState { visible, ..self },
            ViewAction::Cleared => ViewState {
                visible: self.visible,
                ..ViewState::default()
            },
            _ => self,
        }
    }

    pub fn is_active_and_visible(&self, peer: UserId) -> bool {
        self.visible && self.active_peer == Some(peer)
    }
}

/// Scroll geometry of the message list, in pixels, as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    pub fn near_top(&self, threshold: f64) -> bool {
        self.scroll_top <= threshold
    }

    pub fn near_bottom(&self, threshold: f64) -> bool {
        self.distance_from_bottom() < threshold
    }
}

/// Scroll position captured before older messages are prepended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    prev_scroll_height: f64,
    prev_scroll_top: f64,
}

impl ScrollAnchor {
    pub fn capture(viewport: &Viewport) -> Self {
        Self {
            prev_scroll_height: viewport.scroll_height,
            prev_scroll_top: viewport.scroll_top,
        }
    }

    /// The `scroll_top` that keeps the previously visible content in place.
    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        (new_scroll_height - self.prev_scroll_height + self.prev_scroll_top).max(0.0)
    }
}

/// How the renderer should move the message list after a change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollHint {
    Bottom,
    Keep,
    Anchor(ScrollAnchor),
}

/// Outcome of offering a scroll event to the [`ScrollThrottle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Throttled {
    /// Evaluate this viewport now.
    Run,
    /// Held back; the caller evaluates [`ScrollThrottle::take_trailing`] at `at`.
    Deferred { at: Instant },
    /// Held back behind an already scheduled trailing evaluation.
    Coalesced,
}

/// Throttle for scroll input: runs the first event of a window, then the newest one held
/// back during it once the window closes.
#[derive(Debug)]
pub struct ScrollThrottle {
    interval: Duration,
    last: Option<Instant>,
    trailing: Option<Viewport>,
    trailing_at: Option<Instant>,
}

impl ScrollThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            trailing: None,
            trailing_at: None,
        }
    }

    pub fn offer(&mut self, now: Instant, viewport: Viewport) -> Throttled {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => {
                self.trailing = Some(viewport);
                if self.trailing_at.is_some() {
                    return Throttled::Coalesced;
                }
                let at = last + self.interval;
                self.trailing_at = Some(at);
                Throttled::Deferred { at }
            }
            _ => {
                self.last = Some(now);
                self.trailing = None;
                self.trailing_at = None;
                Throttled::Run
            }
        }
    }

    /// The newest held-back viewport once its window has closed. `None` if a later run
    /// superseded it or a newer deferral is still pending.
    pub fn take_trailing(&mut self, now: Instant) -> Option<Viewport> {
        if self.trailing_at.is_some_and(|at| now < at) {
            return None;
        }
        self.trailing_at = None;
        let viewport = self.trailing.take()?;
        self.last = Some(now);
        Some(viewport)
    }
}

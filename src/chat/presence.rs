use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::common::{OnlineStatus, Peer, PeerSummary, UserId};

/// Result of applying one `presence` delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Changed,
    Unchanged,
    /// The server knows a user we have not synced; the peer list should be refetched.
    UnknownPeerOnline,
    UnknownPeerOffline,
}

/// Known peers plus the tracked online set. Every mutation updates both, so a peer's
/// `online_status` always equals membership of its id in the set.
#[derive(Debug, Default)]
pub struct PeerRoster {
    peers: HashMap<UserId, Peer>,
    online: HashSet<UserId>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn status_of(&self, id: UserId) -> OnlineStatus {
        if self.online.contains(&id) {
            OnlineStatus::Online
        } else {
            OnlineStatus::Offline
        }
    }

    /// Replaces the online set wholesale. Returns the peers whose status flipped.
    pub fn apply_snapshot(&mut self, online: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
        self.online = online.into_iter().collect();

        let mut changed = Vec::new();
        for peer in self.peers.values_mut() {
            let status = if self.online.contains(&peer.id) {
                OnlineStatus::Online
            } else {
                OnlineStatus::Offline
            };
            if peer.online_status != status {
                peer.online_status = status;
                changed.push(peer.id);
            }
        }
        changed.sort_unstable();
        changed
    }

    pub fn apply_delta(&mut self, user_id: UserId, status: OnlineStatus) -> DeltaOutcome {
        match status {
            OnlineStatus::Online => self.online.insert(user_id),
            OnlineStatus::Offline => self.online.remove(&user_id),
        };

        match self.peers.get_mut(&user_id) {
            Some(peer) if peer.online_status == status => DeltaOutcome::Unchanged,
            Some(peer) => {
                peer.online_status = status;
                DeltaOutcome::Changed
            }
            None if status.is_online() => DeltaOutcome::UnknownPeerOnline,
            None => DeltaOutcome::UnknownPeerOffline,
        }
    }

    /// Merges a peer-list fetch. Status comes from the tracked set, never from the rows;
    /// peers missing from the list are kept for the rest of the session.
    pub fn load_peers(&mut self, summaries: Vec<PeerSummary>) {
        for summary in summaries {
            let online_status = self.status_of(summary.id);
            match self.peers.get_mut(&summary.id) {
                Some(peer) => {
                    peer.display_name = summary.username;
                    peer.online_status = online_status;
                    if summary.last_message_at > peer.last_message_at {
                        peer.last_message_at = summary.last_message_at;
                    }
                }
                None => {
                    self.peers.insert(
                        summary.id,
                        Peer {
                            id: summary.id,
                            display_name: summary.username,
                            online_status,
                            last_message_at: summary.last_message_at,
                        },
                    );
                }
            }
        }
    }

    /// A freshly registered user; the server only announces users that are connected.
    /// Returns `false` when the peer was already known.
    pub fn add_peer(&mut self, id: UserId, username: String) -> bool {
        self.online.insert(id);
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.online_status = OnlineStatus::Online;
            return false;
        }
        self.peers.insert(
            id,
            Peer {
                id,
                display_name: username,
                online_status: OnlineStatus::Online,
                last_message_at: None,
            },
        );
        true
    }

    /// Records message activity. Returns whether the display order may have changed.
    pub fn touch(&mut self, id: UserId, at: DateTime<Utc>) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.last_message_at.is_none_or(|last| last < at) => {
                peer.last_message_at = Some(at);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: UserId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn is_online(&self, id: UserId) -> bool {
        self.online.contains(&id)
    }

    /// Display order: peers with history first, most recent first, then by name.
    pub fn sorted(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(display_order);
        peers
    }
}

fn display_order(a: &Peer, b: &Peer) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(a_at), Some(b_at)) if a_at != b_at => b_at.cmp(&a_at),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => a
            .display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then(a.id.cmp(&b.id)),
    }
}

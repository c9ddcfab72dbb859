#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use forum_chat::chat::ChatSession;
use forum_chat::common::{ChatMessage, HistoryPage, LocalUser, PeerSummary, UserId};
use forum_chat::config::AppConfig;
use forum_chat::error::{FetchError, TransportError};
use forum_chat::network::{ChatApi, ConnectionState, Transport, TransportEvent, TransportFactory};
use forum_chat::storage::ReadMarkerDatabase;
use reqwest::Url;
use tokio::sync::mpsc;

pub const LOCAL: UserId = 100;

pub struct FakeApi {
    pub peers: Vec<PeerSummary>,
    pub history: Mutex<HashMap<UserId, VecDeque<HistoryPage>>>,
    pub history_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new(peers: &[(UserId, &str)]) -> Self {
        Self {
            peers: peers
                .iter()
                .map(|(id, name)| PeerSummary {
                    id: *id,
                    username: name.to_string(),
                    last_message_at: None,
                })
                .collect(),
            history: Mutex::new(HashMap::new()),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_history(self, peer: UserId, page: HistoryPage) -> Self {
        self.history
            .lock()
            .unwrap()
            .entry(peer)
            .or_default()
            .push_back(page);
        self
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn current_user(&self) -> Result<LocalUser, FetchError> {
        Ok(LocalUser {
            id: LOCAL,
            username: "me".to_string(),
        })
    }

    async fn fetch_peers(&self) -> Result<Vec<PeerSummary>, FetchError> {
        Ok(self.peers.clone())
    }

    async fn fetch_history(&self, peer: UserId, _offset: usize) -> Result<HistoryPage, FetchError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let page = self
            .history
            .lock()
            .unwrap()
            .get_mut(&peer)
            .and_then(VecDeque::pop_front);
        Ok(page.unwrap_or(HistoryPage {
            messages: Vec::new(),
            has_more: false,
        }))
    }
}

struct NullSocket;

#[async_trait]
impl Transport for NullSocket {
    async fn send_text(&self, _frame: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// Every dial succeeds; the test plays the server through `push`.
#[derive(Default)]
pub struct FakeServer {
    pub dials: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl FakeServer {
    pub async fn push(&self, frame: &str) {
        let sender = self.sender.lock().unwrap().clone();
        sender
            .expect("no socket open")
            .send(TransportEvent::Text(frame.to_string()))
            .await
            .unwrap();
    }

    pub async fn drop_connection(&self) {
        let sender = self.sender.lock().unwrap().take();
        sender
            .expect("no socket open")
            .send(TransportEvent::Disconnected)
            .await
            .unwrap();
    }
}

#[async_trait]
impl TransportFactory for FakeServer {
    async fn create_transport(
        &self,
        _endpoint: &Url,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        tx.send(TransportEvent::Connected).await.unwrap();
        *self.sender.lock().unwrap() = Some(tx);
        Ok((Arc::new(NullSocket), rx))
    }
}

pub async fn start(api: FakeApi, server: Arc<FakeServer>) -> ChatSession {
    let session = ChatSession::start_with(
        &AppConfig::default(),
        Arc::new(api),
        server,
        Box::new(ReadMarkerDatabase::in_memory().unwrap()),
    )
    .await
    .unwrap();
    let mut state = session.channel().subscribe_state();
    state
        .wait_for(|state| *state == ConnectionState::Open)
        .await
        .unwrap();
    session
}

/// Polls `check` until it holds; socket frames are applied on the channel worker task.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

pub fn message(id: i64, from: UserId, to: UserId) -> ChatMessage {
    ChatMessage {
        id,
        from,
        to,
        content: format!("message {id}"),
        created_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap()
            + chrono::Duration::minutes(id),
    }
}

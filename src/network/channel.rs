use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::common::{InboundEvent, OutboundEvent};

use super::dispatcher::{EventDispatcher, EventHandler};
use super::transport::{Transport, TransportEvent, TransportFactory};

/// Connectivity of the shared socket, as shown by the connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Terminal; reached only through [`TransportChannel::close`].
    Closed,
}

#[derive(Debug)]
enum ChannelCommand {
    Connect { force: bool },
    Send(String),
    Close,
}

/// The single socket connection shared by every consumer.
///
/// Owns a background worker that dials through the [`TransportFactory`], parses text
/// frames into [`InboundEvent`]s, fans them out through the [`EventDispatcher`] and
/// re-dials after an unexpected close. Must be created inside a tokio runtime.
pub struct TransportChannel {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: Arc<EventDispatcher>,
}

impl TransportChannel {
    pub fn create(
        endpoint: Url,
        factory: Arc<dyn TransportFactory>,
        reconnect_delay: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Arc::new(EventDispatcher::new());

        let worker = ChannelWorker {
            endpoint,
            factory,
            reconnect_delay,
            dispatcher: dispatcher.clone(),
            state: state_tx,
            commands: command_rx,
            socket: None,
            events: None,
            reconnect_at: None,
        };
        tokio::spawn(worker.run());

        Self {
            commands: command_tx,
            state: state_rx,
            dispatcher,
        }
    }

    /// No-op while a socket is open unless `force` is set, in which case the existing
    /// socket is dropped before a new one is dialed.
    pub fn connect(&self, force: bool) {
        if self.commands.send(ChannelCommand::Connect { force }).is_err() {
            log::warn!("Channel already closed; ignoring connect request");
        }
    }

    /// Queues `event` for the open socket. `false` means nothing was written.
    pub fn send(&self, event: &OutboundEvent) -> bool {
        if self.state() != ConnectionState::Open {
            log::warn!("Socket not connected; cannot send");
            return false;
        }
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Failed to serialize outbound event: {err}");
                return false;
            }
        };
        self.commands.send(ChannelCommand::Send(frame)).is_ok()
    }

    /// Terminal: drops every handler, cancels any pending reconnect and closes the socket.
    pub fn close(&self) {
        self.dispatcher.clear();
        let _ = self.commands.send(ChannelCommand::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) -> bool {
        self.dispatcher.add_handler(handler)
    }

    pub fn remove_handler(&self, handler: &Arc<dyn EventHandler>) -> bool {
        self.dispatcher.remove_handler(handler)
    }
}

struct ChannelWorker {
    endpoint: Url,
    factory: Arc<dyn TransportFactory>,
    reconnect_delay: Duration,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    socket: Option<Arc<dyn Transport>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// At most one reconnect is ever outstanding.
    reconnect_at: Option<Instant>,
}

impl ChannelWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(ChannelCommand::Close) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                event = next_event(&mut self.events) => {
                    self.handle_transport_event(event);
                }
                _ = reconnect_due(self.reconnect_at) => {
                    self.reconnect_at = None;
                    log::info!("Attempting to reconnect to {}", self.endpoint);
                    self.open().await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Connect { force } => {
                if self.socket.is_some() {
                    if !force {
                        log::debug!("Socket already connected");
                        return;
                    }
                    log::info!("Forcing a fresh connection");
                    self.drop_socket().await;
                }
                self.open().await;
            }
            ChannelCommand::Send(frame) => match &self.socket {
                Some(socket) => {
                    if let Err(err) = socket.send_text(frame).await {
                        log::warn!("Failed to write frame: {err}");
                    }
                }
                None => log::warn!("Socket went away before frame could be written"),
            },
            ChannelCommand::Close => {}
        }
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Connected) => {
                log::info!("WebSocket connected");
                self.reconnect_at = None;
                self.publish(ConnectionState::Open);
            }
            Some(TransportEvent::Text(frame)) => match InboundEvent::parse(&frame) {
                Ok(event) => {
                    log::trace!("<-- `{}` event", event.kind());
                    self.dispatcher.dispatch(&event);
                }
                Err(err) => {
                    log::warn!("Dropping malformed frame ({err}): {frame}");
                }
            },
            Some(TransportEvent::Binary(data)) => {
                log::trace!("Ignoring {} byte binary frame", data.len());
            }
            Some(TransportEvent::Disconnected) | None => {
                log::info!("WebSocket disconnected");
                self.socket = None;
                self.events = None;
                self.publish(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    async fn open(&mut self) {
        self.reconnect_at = None;
        self.publish(ConnectionState::Connecting);

        match self.factory.create_transport(&self.endpoint).await {
            Ok((socket, events)) => {
                self.socket = Some(socket);
                self.events = Some(events);
            }
            Err(err) => {
                log::warn!("Connection to {} failed: {err}", self.endpoint);
                self.publish(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            log::debug!("Replacing pending reconnect timer");
        }
        log::info!("Reconnecting in {:?}", self.reconnect_delay);
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
    }

    async fn drop_socket(&mut self) {
        // Stop listening first so the old socket's close is not treated as unexpected.
        self.events = None;
        if let Some(socket) = self.socket.take() {
            socket.disconnect().await;
        }
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.drop_socket().await;
        self.publish(ConnectionState::Closed);
        log::info!("Channel closed");
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::TransportError;

    /// Socket double that records written frames.
    pub struct RecordingSocket {
        pub frames: Mutex<Vec<String>>,
        pub disconnects: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RecordingSocket {
        async fn send_text(&self, frame: String) -> Result<(), TransportError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Factory double: each attempt pops the next scripted outcome (`true` = success,
    /// default success) and keeps the event sender so tests can play the server.
    #[derive(Default)]
    pub struct ScriptedFactory {
        pub attempts: AtomicUsize,
        outcomes: Mutex<VecDeque<bool>>,
        servers: Mutex<Vec<(Arc<RecordingSocket>, mpsc::Sender<TransportEvent>)>>,
    }

    impl ScriptedFactory {
        pub fn failing_next(&self, count: usize) {
            let mut outcomes = self.outcomes.lock().unwrap();
            for _ in 0..count {
                outcomes.push_back(false);
            }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Event sender of the most recent socket.
        pub fn server(&self) -> mpsc::Sender<TransportEvent> {
            self.servers.lock().unwrap().last().unwrap().1.clone()
        }

        pub fn socket(&self) -> Arc<RecordingSocket> {
            self.servers.lock().unwrap().last().unwrap().0.clone()
        }
    }

    #[async_trait]
    impl TransportFactory for ScriptedFactory {
        async fn create_transport(
            &self,
            _endpoint: &Url,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let succeed = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
            if !succeed {
                return Err(TransportError::Connect("scripted failure".to_string()));
            }

            let (tx, rx) = mpsc::channel(32);
            tx.send(TransportEvent::Connected).await.unwrap();
            let socket = Arc::new(RecordingSocket {
                frames: Mutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            });
            self.servers.lock().unwrap().push((socket.clone(), tx));
            Ok((socket, rx))
        }
    }

    pub fn endpoint() -> Url {
        Url::parse("ws://forum.test/ws").unwrap()
    }

    pub async fn wait_for(channel: &TransportChannel, state: ConnectionState) {
        let mut rx = channel.subscribe_state();
        rx.wait_for(|current| *current == state).await.unwrap();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::*;
    use super::*;
    use crate::error::HandlerError;

    const DELAY: Duration = Duration::from_millis(2000);

    fn collecting_handler(seen: Arc<Mutex<Vec<InboundEvent>>>) -> Arc<dyn EventHandler> {
        Arc::new(move |event: &InboundEvent| -> Result<(), HandlerError> {
            seen.lock().unwrap().push(event.clone());
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_a_no_op_while_open() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);

        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        channel.connect(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.attempts(), 1);

        channel.connect(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.attempts(), 2);
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reconnect_closes_the_old_socket() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        let first = factory.socket();

        channel.connect(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_text_frames_and_drops_garbage() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        let seen = Arc::new(Mutex::new(Vec::new()));
        channel.add_handler(collecting_handler(seen.clone()));

        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        let server = factory.server();
        server
            .send(TransportEvent::Text("{not json".to_string()))
            .await
            .unwrap();
        server.send(TransportEvent::Binary(vec![0x9])).await.unwrap();
        server
            .send(TransportEvent::Text(
                r#"{"type":"presence","user_id":4,"status":"online"}"#.to_string(),
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), "presence");
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_only_when_open() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        let event = OutboundEvent::Message {
            to: 2,
            content: "hi".to_string(),
        };

        assert!(!channel.send(&event));

        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        assert!(channel.send(&event));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let frames = factory.socket().frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""type":"message""#));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_schedules_one_reconnect_after_delay() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;

        factory.server().send(TransportEvent::Disconnected).await.unwrap();
        wait_for(&channel, ConnectionState::Disconnected).await;

        tokio::time::sleep(Duration::from_millis(1990)).await;
        assert_eq!(factory.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(factory.attempts(), 2);
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn second_close_before_timer_does_not_stack_timers() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;

        // First unexpected close arms the timer.
        factory.server().send(TransportEvent::Disconnected).await.unwrap();
        wait_for(&channel, ConnectionState::Disconnected).await;

        // A manual dial in the window fails: a second unexpected close.
        factory.failing_next(1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        channel.connect(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.attempts(), 2);

        // Only one timer is outstanding, re-armed by the latest close.
        tokio::time::sleep(Duration::from_millis(1980)).await;
        assert_eq!(factory.attempts(), 2);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(factory.attempts(), 3);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(factory.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dial_retries_until_it_succeeds() {
        let factory = Arc::new(ScriptedFactory::default());
        factory.failing_next(2);
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);

        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        assert_eq!(factory.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_terminal() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        let seen = Arc::new(Mutex::new(Vec::new()));
        channel.add_handler(collecting_handler(seen));

        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;
        let server = factory.server();
        let socket = factory.socket();

        channel.close();
        assert!(channel.dispatcher().is_empty());
        wait_for(&channel, ConnectionState::Closed).await;
        assert_eq!(socket.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);

        let _ = server.send(TransportEvent::Disconnected).await;
        channel.connect(false);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(factory.attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(!channel.send(&OutboundEvent::Message {
            to: 1,
            content: "late".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_reconnect() {
        let factory = Arc::new(ScriptedFactory::default());
        let channel = TransportChannel::create(endpoint(), factory.clone(), DELAY);
        channel.connect(false);
        wait_for(&channel, ConnectionState::Open).await;

        factory.server().send(TransportEvent::Disconnected).await.unwrap();
        wait_for(&channel, ConnectionState::Disconnected).await;
        channel.close();
        wait_for(&channel, ConnectionState::Closed).await;

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(factory.attempts(), 1);
    }
}

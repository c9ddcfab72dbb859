use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::common::LocalUser;
use crate::config::AppConfig;
use crate::error::{SessionError, StorageError};
use crate::network::{
    ChatApi, EventHandler, HttpChatApi, TransportChannel, TransportFactory,
    TungsteniteTransportFactory, socket_endpoint,
};
use crate::storage::{self, ReadMarkerDatabase, WatermarkStore};

use super::activity::ActivityFeed;
use super::controller::{ChatController, ChatUpdate, ControllerSettings};
use super::unread::UnreadTracker;

/// Process-wide chat context: one channel, one controller, created at startup and torn
/// down on [`ChatSession::shutdown`].
pub struct ChatSession {
    channel: Arc<TransportChannel>,
    controller: Arc<ChatController>,
    controller_loop: JoinHandle<()>,
}

impl ChatSession {
    /// Wires the production HTTP client, websocket factory and SQLite read markers.
    pub async fn start(config: &AppConfig) -> Result<Self, SessionError> {
        let api = HttpChatApi::new(&config.server_origin, config.session_cookie.clone())
            .map_err(SessionError::Api)?;
        storage::ensure_data_dir(&config.database_path).map_err(StorageError::from)?;
        let markers =
            ReadMarkerDatabase::with_path(&config.database_path).map_err(StorageError::from)?;
        let factory = TungsteniteTransportFactory::new(config.session_cookie.clone());

        Self::start_with(config, Arc::new(api), Arc::new(factory), Box::new(markers)).await
    }

    pub async fn start_with(
        config: &AppConfig,
        api: Arc<dyn ChatApi>,
        factory: Arc<dyn TransportFactory>,
        store: Box<dyn WatermarkStore>,
    ) -> Result<Self, SessionError> {
        let local_user = api.current_user().await.map_err(SessionError::Identity)?;
        log::info!("Signed in as {} (#{})", local_user.username, local_user.id);

        let endpoint = socket_endpoint(&config.server_origin)?;
        let channel = Arc::new(TransportChannel::create(
            endpoint,
            factory,
            config.reconnect_delay(),
        ));
        let unread = UnreadTracker::load(local_user.id, store);
        let controller = ChatController::new(
            local_user,
            api,
            channel.clone(),
            unread,
            ControllerSettings::from_config(config),
        );

        let chat: Arc<dyn EventHandler> = controller.clone();
        channel.add_handler(chat);
        channel.add_handler(Arc::new(ActivityFeed::new(controller.update_sender())));
        let controller_loop = tokio::spawn(controller.clone().run());

        // Presence that arrives before the list is merged once the list lands.
        if let Err(err) = controller.refresh_peers().await {
            log::warn!("Starting without a peer list: {err}");
        }
        channel.connect(false);

        Ok(Self {
            channel,
            controller,
            controller_loop,
        })
    }

    pub fn controller(&self) -> &Arc<ChatController> {
        &self.controller
    }

    pub fn channel(&self) -> &Arc<TransportChannel> {
        &self.channel
    }

    pub fn local_user(&self) -> &LocalUser {
        self.controller.local_user()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.controller.subscribe()
    }

    pub async fn shutdown(self) {
        log::info!("Shutting down chat session");
        self.channel.close();
        if let Err(err) = self.controller_loop.await {
            log::warn!("Chat controller loop ended abnormally: {err}");
        }
    }
}

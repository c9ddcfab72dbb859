use tokio::sync::broadcast;

use crate::common::InboundEvent;
use crate::error::HandlerError;
use crate::network::EventHandler;

use super::controller::ChatUpdate;

/// Forwards post and comment broadcasts to the views that render them.
pub struct ActivityFeed {
    updates: broadcast::Sender<ChatUpdate>,
}

impl ActivityFeed {
    pub fn new(updates: broadcast::Sender<ChatUpdate>) -> Self {
        Self { updates }
    }
}

impl EventHandler for ActivityFeed {
    fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        if event.is_activity() {
            log::debug!("Forwarding `{}` activity", event.kind());
            let _ = self.updates.send(ChatUpdate::Activity(event.clone()));
        }
        Ok(())
    }
}

pub mod models;
pub mod read_markers;

pub use read_markers::ReadMarkerDatabase;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::common::{MessageId, UserId};
use crate::error::StorageError;

/// Durable peer -> last-read-message map, keyed per local user.
pub trait WatermarkStore: Send {
    fn load(&self, local_user_id: UserId) -> Result<HashMap<UserId, MessageId>, StorageError>;

    fn save(
        &self,
        local_user_id: UserId,
        peer_id: UserId,
        last_read_message_id: MessageId,
    ) -> Result<(), StorageError>;
}

/// Ensure the directory holding `db_path` exists
pub fn ensure_data_dir(db_path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

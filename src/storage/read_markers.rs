use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, Result as SqlResult, params};

use crate::common::{MessageId, UserId};
use crate::error::StorageError;

use super::WatermarkStore;
use super::models::ReadMarker;

/// Durable read watermarks, one row per (local user, peer).
pub struct ReadMarkerDatabase {
    conn: Connection,
}

impl ReadMarkerDatabase {
    /// Open (or create) the marker database at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        // Other sessions may hold the file.
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        Self::init(conn)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS read_markers (
                local_user_id INTEGER NOT NULL,
                peer_id INTEGER NOT NULL,
                last_read_message_id INTEGER NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (local_user_id, peer_id)
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Last-write-wins upsert
    pub fn upsert_marker(
        &self,
        local_user_id: UserId,
        peer_id: UserId,
        last_read_message_id: MessageId,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO read_markers
                (local_user_id, peer_id, last_read_message_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                local_user_id,
                peer_id,
                last_read_message_id,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// All markers of one local user
    pub fn markers_for(&self, local_user_id: UserId) -> SqlResult<Vec<ReadMarker>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_user_id, peer_id, last_read_message_id, updated_at
             FROM read_markers
             WHERE local_user_id = ?1
             ORDER BY peer_id ASC",
        )?;

        let markers = stmt
            .query_map(params![local_user_id], |row| {
                Ok(ReadMarker {
                    local_user_id: row.get(0)?,
                    peer_id: row.get(1)?,
                    last_read_message_id: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(markers)
    }
}

impl WatermarkStore for ReadMarkerDatabase {
    fn load(&self, local_user_id: UserId) -> Result<HashMap<UserId, MessageId>, StorageError> {
        let markers = self.markers_for(local_user_id)?;
        Ok(markers
            .into_iter()
            .map(|marker| (marker.peer_id, marker.last_read_message_id))
            .collect())
    }

    fn save(
        &self,
        local_user_id: UserId,
        peer_id: UserId,
        last_read_message_id: MessageId,
    ) -> Result<(), StorageError> {
        self.upsert_marker(local_user_id, peer_id, last_read_message_id)?;
        Ok(())
    }
}

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin the forum is served from; the socket endpoint is derived from it.
    pub server_origin: String,
    /// Raw `Cookie` header value for the authenticated session.
    pub session_cookie: Option<String>,
    pub reconnect_delay_ms: u64,
    pub database_path: String,
    pub load_more_threshold_px: f64,
    pub stick_to_bottom_threshold_px: f64,
    pub scroll_throttle_ms: u64,
    pub update_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_origin: "http://localhost:8080".to_string(),
            session_cookie: None,
            reconnect_delay_ms: 2000,
            database_path: "data/client.db".to_string(),
            load_more_threshold_px: 40.0,
            stick_to_bottom_threshold_px: 80.0,
            scroll_throttle_ms: 500,
            update_buffer: 256,
        }
    }
}

impl AppConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn scroll_throttle(&self) -> Duration {
        Duration::from_millis(self.scroll_throttle_ms)
    }

    /// `FORUM_ORIGIN`, `FORUM_SESSION` and `FORUM_DB_PATH` win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(origin) = non_empty("FORUM_ORIGIN") {
            self.server_origin = origin;
        }
        if let Some(cookie) = non_empty("FORUM_SESSION") {
            self.session_cookie = Some(cookie);
        }
        if let Some(path) = non_empty("FORUM_DB_PATH") {
            self.database_path = path;
        }
    }
}

/// Reads the JSON config at `path`. A missing, unreadable or malformed file yields the
/// defaults; a zero reconnect delay is replaced so a flapping socket cannot spin.
pub fn load_config(path: impl AsRef<Path>) -> AppConfig {
    let path = path.as_ref();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("No config at {}; using defaults", path.display());
            return AppConfig::default();
        }
        Err(err) => {
            log::warn!("Cannot read config {}: {err}; using defaults", path.display());
            return AppConfig::default();
        }
    };

    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(config) => config.checked(),
        Err(err) => {
            log::warn!("Ignoring malformed config {}: {err}", path.display());
            AppConfig::default()
        }
    }
}

impl AppConfig {
    fn checked(mut self) -> Self {
        if self.reconnect_delay_ms == 0 {
            let fallback = AppConfig::default().reconnect_delay_ms;
            log::warn!("reconnect_delay_ms must be positive; using {fallback}");
            self.reconnect_delay_ms = fallback;
        }
        self
    }
}

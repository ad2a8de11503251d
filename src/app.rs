use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::models::{User, UserId};
use crate::error::{Result, SyncError};
use crate::sync::presence::DEFAULT_TYPING_WINDOW;

/// Backoff for reconnecting a dropped socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt following `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 2u64.saturating_pow(failures.min(32));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

fn default_typing_window_ms() -> u64 {
    DEFAULT_TYPING_WINDOW.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppState {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default = "default_typing_window_ms")]
    pub typing_window_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            user_id: String::new(),
            user_name: String::new(),
            typing_window_ms: default_typing_window_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
    // TOML is the primary format. A legacy JSON state file is migrated to TOML on first load.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let cfg_dir = base.config_dir();
        Some(cfg_dir.join("chat-sync.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = directories::ProjectDirs::from("com", "example", "ChatSync")?;
        Some(proj.config_dir().join("state.json"))
    }

    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            match Self::load_from(&path) {
                Ok(state) => return state,
                Err(SyncError::Io(_)) => {}
                Err(e) => log::warn!("ignoring unreadable config {}: {}", path.display(), e),
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(bytes) = fs::read(&legacy) {
                if let Ok(state) = serde_json::from_slice::<AppState>(&bytes) {
                    if let Err(e) = state.save() {
                        log::warn!("could not migrate legacy config: {}", e);
                    }
                    return state;
                }
            }
        }

        Self::new()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str::<AppState>(&text)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| SyncError::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn user(&self) -> User {
        User {
            id: UserId::new(self.user_id.clone()),
            name: self.user_name.clone(),
            token: self.token.clone(),
        }
    }

    pub fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url is not set".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(SyncError::Config("user_id is not set".into()));
        }
        Ok(())
    }
}

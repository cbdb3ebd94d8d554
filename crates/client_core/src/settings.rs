//! Local chat preferences shared by every open window of the client.
//!
//! One [`SettingsService`] owns the current value and publishes it through a
//! `watch` channel; windows subscribe instead of re-reading storage. The blob
//! on disk is the same camelCase object under the fixed key name, so other
//! processes can still edit it and [`SettingsService::reload`] picks that up.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;

pub const SETTINGS_STORAGE_KEY: &str = "chatSettings";
const APP_DIR_NAME: &str = "messenger";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatSettings {
    pub bg_color: String,
    pub bg_opacity: u8,
    pub font_family: String,
    pub font_size: u16,
    pub font_weight: String,
    pub notification_enabled: bool,
    pub auto_login: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            bg_color: "#666666".to_owned(),
            bg_opacity: 100,
            font_family: "system".to_owned(),
            font_size: 14,
            font_weight: "normal".to_owned(),
            notification_enabled: true,
            auto_login: false,
        }
    }
}

impl ChatSettings {
    pub fn is_light_background(&self) -> bool {
        background_brightness(&self.bg_color).is_some_and(|brightness| brightness > 128)
    }

    pub fn font_weight_value(&self) -> u16 {
        font_weight_value(&self.font_weight)
    }
}

/// Perceived brightness (0..=255) of a `#rrggbb` colour.
pub fn background_brightness(hex: &str) -> Option<u32> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u32::from_str_radix(&digits[range], 16).ok();
    let (r, g, b) = (channel(0..2)?, channel(2..4)?, channel(4..6)?);
    Some((r * 299 + g * 587 + b * 114) / 1000)
}

pub fn font_weight_value(weight: &str) -> u16 {
    match weight {
        "thin" => 300,
        "bold" => 600,
        _ => 400,
    }
}

/// The persisted preferences blob.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SETTINGS_STORAGE_KEY}.json")),
        }
    }

    /// `<config dir>/messenger/chatSettings.json` for the current user.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::in_dir(dir.join(APP_DIR_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the blob, filling missing fields with defaults. A missing file
    /// yields the defaults.
    pub async fn load(&self) -> Result<ChatSettings> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ChatSettings::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, settings: &ChatSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(settings)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "chat settings saved");
        Ok(())
    }
}

/// Single source of truth for [`ChatSettings`] inside a process.
pub struct SettingsService {
    store: SettingsStore,
    current: watch::Sender<ChatSettings>,
}

impl SettingsService {
    /// Load from `store`; unreadable blobs fall back to the defaults.
    pub async fn open(store: SettingsStore) -> Self {
        let initial = match store.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = %store.path().display(), error = %err, "chat settings unreadable, using defaults");
                ChatSettings::default()
            }
        };
        let (current, _) = watch::channel(initial);
        Self { store, current }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn current(&self) -> ChatSettings {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSettings> {
        self.current.subscribe()
    }

    /// Apply `change`, persist, then publish. The last writer wins.
    pub async fn update(&self, change: impl FnOnce(&mut ChatSettings)) -> Result<ChatSettings> {
        let mut next = self.current();
        change(&mut next);
        self.store.save(&next).await?;
        self.current.send_replace(next.clone());
        info!("chat settings updated");
        Ok(next)
    }

    /// Re-read the blob written by another process. Returns whether the
    /// published value changed.
    pub async fn reload(&self) -> Result<bool> {
        let loaded = self.store.load().await?;
        Ok(self.current.send_if_modified(|current| {
            if *current == loaded {
                return false;
            }
            *current = loaded;
            true
        }))
    }
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;

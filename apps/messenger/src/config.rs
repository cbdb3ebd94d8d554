use std::{collections::HashMap, fs, path::PathBuf};

use anyhow::{bail, Context};
use client_core::{clamp_page_size, DEFAULT_PAGE_SIZE};
use url::Url;

const CONFIG_FILE: &str = "messenger.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: Option<String>,
    pub anon_key: String,
    pub page_size: usize,
    pub settings_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            settings_dir: None,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    if let Some(v) = text("backend_url") {
        settings.backend_url = Some(v);
    }
    if let Some(v) = text("anon_key") {
        settings.anon_key = v;
    }
    if let Some(v) = file_cfg.get("page_size").and_then(|v| v.as_integer()) {
        settings.page_size = clamp_page_size(usize::try_from(v).unwrap_or(DEFAULT_PAGE_SIZE));
    }
    if let Some(v) = text("settings_dir") {
        settings.settings_dir = Some(PathBuf::from(v));
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("MESSENGER_BACKEND_URL") {
        settings.backend_url = Some(v);
    }
    if let Some(v) = var("APP__BACKEND_URL") {
        settings.backend_url = Some(v);
    }

    if let Some(v) = var("MESSENGER_ANON_KEY") {
        settings.anon_key = v;
    }

    if let Some(v) = var("MESSENGER_PAGE_SIZE") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.page_size = clamp_page_size(parsed);
        }
    }

    if let Some(v) = var("MESSENGER_SETTINGS_DIR") {
        settings.settings_dir = Some(PathBuf::from(v));
    }
}

/// Check the scheme and drop trailing slashes so paths can be appended.
pub fn normalize_backend_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).with_context(|| format!("invalid backend url '{raw}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("backend url '{raw}' must use http or https");
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

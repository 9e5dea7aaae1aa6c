use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "meeting.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub relay_url: String,
    pub api_base_url: String,
    pub poll_interval: Duration,
    pub lookup_timeout: Duration,
    pub connect_timeout: Duration,
    pub preview_timeout: Duration,
    pub history_limit: usize,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3001/relay".into(),
            api_base_url: "http://localhost:3000/api".into(),
            poll_interval: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            preview_timeout: Duration::from_secs(4),
            history_limit: 500,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    relay_url: Option<String>,
    api_base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    lookup_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    preview_timeout_ms: Option<u64>,
    history_limit: Option<usize>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

/// Defaults, then `meeting.toml` (or the given file), then `MEET__*` environment variables.
pub fn load_settings(path: Option<&Path>) -> SessionSettings {
    let mut settings = SessionSettings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => {
                warn!(path = %path.display(), %err, "config: ignoring invalid settings file")
            }
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut SessionSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.relay_url {
        settings.relay_url = v;
    }
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.lookup_timeout_ms {
        settings.lookup_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.connect_timeout_ms {
        settings.connect_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.preview_timeout_ms {
        settings.preview_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.history_limit {
        settings.history_limit = v;
    }
    if let Some(v) = file_cfg.reconnect_attempts {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    normalize(settings);
}

fn apply_env_overrides(settings: &mut SessionSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("MEET__RELAY_URL") {
        settings.relay_url = v;
    }
    if let Some(v) = var("MEET__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = parse_millis(&var, "MEET__POLL_INTERVAL_MS") {
        settings.poll_interval = v;
    }
    if let Some(v) = parse_millis(&var, "MEET__LOOKUP_TIMEOUT_MS") {
        settings.lookup_timeout = v;
    }
    if let Some(v) = parse_millis(&var, "MEET__CONNECT_TIMEOUT_MS") {
        settings.connect_timeout = v;
    }
    if let Some(v) = parse_millis(&var, "MEET__PREVIEW_TIMEOUT_MS") {
        settings.preview_timeout = v;
    }
    if let Some(v) = var("MEET__HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        settings.history_limit = v;
    }
    if let Some(v) = var("MEET__RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = parse_millis(&var, "MEET__RECONNECT_DELAY_MS") {
        settings.reconnect_delay = v;
    }
    normalize(settings);
}

fn parse_millis(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = var(key)?;
    match raw.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(err) => {
            warn!(key, %raw, %err, "config: ignoring non-numeric duration override");
            None
        }
    }
}

// Zero intervals would spin the poll timer or time out every call; a zero history would reject
// every message.
fn normalize(settings: &mut SessionSettings) {
    let defaults = SessionSettings::default();
    if settings.poll_interval.is_zero() {
        settings.poll_interval = defaults.poll_interval;
    }
    if settings.lookup_timeout.is_zero() {
        settings.lookup_timeout = defaults.lookup_timeout;
    }
    if settings.connect_timeout.is_zero() {
        settings.connect_timeout = defaults.connect_timeout;
    }
    if settings.history_limit == 0 {
        settings.history_limit = 1;
    }
    settings.api_base_url = settings.api_base_url.trim_end_matches('/').to_string();
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

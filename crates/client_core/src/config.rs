use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "zynko.toml";
const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Backend origin, without the `/api/v1` prefix.
    pub api_base_url: String,
    pub relay_url: String,
    pub session_file: PathBuf,
    pub ack_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:5000".into(),
            relay_url: "ws://127.0.0.1:3000/ws".into(),
            session_file: PathBuf::from("./data/session.json"),
            ack_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientSettings {
    /// Root of the REST endpoints, e.g. `http://host:5000/api/v1`.
    pub fn api_root(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        if base.ends_with(API_PREFIX) {
            base.to_string()
        } else {
            format!("{base}{API_PREFIX}")
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let api = Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api_base_url '{}'", self.api_base_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(anyhow!("api_base_url must start with http:// or https://"));
        }
        let relay = Url::parse(&self.relay_url)
            .with_context(|| format!("invalid relay_url '{}'", self.relay_url))?;
        if !matches!(relay.scheme(), "ws" | "wss") {
            return Err(anyhow!("relay_url must start with ws:// or wss://"));
        }
        if self.ack_timeout.is_zero() {
            return Err(anyhow!("ack timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Defaults, then `zynko.toml` (or `path`), then environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        apply_file(&mut settings, &file_cfg);
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file_cfg: &HashMap<String, toml::Value>) {
    if let Some(v) = file_cfg.get("api_base_url").and_then(toml::Value::as_str) {
        settings.api_base_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("relay_url").and_then(toml::Value::as_str) {
        settings.relay_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("session_file").and_then(toml::Value::as_str) {
        settings.session_file = PathBuf::from(v);
    }
    if let Some(v) = file_cfg.get("ack_timeout_ms").and_then(toml::Value::as_integer) {
        if let Ok(ms) = u64::try_from(v) {
            settings.ack_timeout = Duration::from_millis(ms);
        }
    }
    if let Some(v) = file_cfg
        .get("request_timeout_secs")
        .and_then(toml::Value::as_integer)
    {
        if let Ok(secs) = u64::try_from(v) {
            settings.request_timeout = Duration::from_secs(secs);
        }
    }
}

fn apply_env(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    // Legacy split host/port form.
    if let Some(ip) = var("API_SERVER_IP") {
        let port = var("API_SERVER_PORT").unwrap_or_else(|| "5000".to_string());
        settings.api_base_url = format!("http://{ip}:{port}");
    }
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = var("RELAY_URL") {
        settings.relay_url = v;
    }
    if let Some(v) = var("APP__RELAY_URL") {
        settings.relay_url = v;
    }

    if let Some(v) = var("APP__SESSION_FILE") {
        settings.session_file = PathBuf::from(v);
    }

    if let Some(v) = var("APP__ACK_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.ack_timeout = Duration::from_millis(parsed);
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

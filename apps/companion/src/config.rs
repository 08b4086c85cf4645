use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use client_core::SessionConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "companion.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub log_filter: String,
    pub resync_history_on_reconnect: bool,
    pub notification_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            database_url: "sqlite://./data/companion.db".into(),
            log_filter: "info".into(),
            resync_history_on_reconnect: false,
            notification_ttl_secs: 5,
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            resync_history_on_reconnect: self.resync_history_on_reconnect,
            notification_ttl: Duration::from_secs(self.notification_ttl_secs.max(1)),
            ..SessionConfig::default()
        }
    }
}

/// Reads `path` (or `companion.toml` in the working directory when no path is
/// given), then applies environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None if Path::new(CONFIG_FILE).exists() => read_settings_file(Path::new(CONFIG_FILE))?,
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file '{}'", path.display()))
}

fn apply_env_overrides(
    settings: &mut Settings,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("COMPANION_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = var("COMPANION_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = var("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    if let Some(v) = var("APP__RESYNC_HISTORY_ON_RECONNECT") {
        settings.resync_history_on_reconnect = parse_flag(&v)
            .with_context(|| "APP__RESYNC_HISTORY_ON_RECONNECT must be a boolean")?;
    }

    if let Some(v) = var("APP__NOTIFICATION_TTL_SECS") {
        settings.notification_ttl_secs = v
            .trim()
            .parse()
            .with_context(|| format!("APP__NOTIFICATION_TTL_SECS must be a number, got '{v}'"))?;
    }

    Ok(())
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognised flag value '{other}'"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

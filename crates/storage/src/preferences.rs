use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::ThemePreference;
use tracing::{debug, warn};

use crate::PreferenceStore;

pub const THEME_KEY: &str = "theme";
pub const UI_STATE_KEY: &str = "ui_state";

/// Snapshot of UI state written alongside the theme key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiStateBlob {
    pub theme: ThemePreference,
    pub timestamp: DateTime<Utc>,
}

/// Reads the stored theme. The `theme` key wins; the UI-state blob is only
/// consulted when that key is missing. Anything unreadable yields the default.
pub async fn restore_theme(store: &dyn PreferenceStore) -> ThemePreference {
    match store.get(THEME_KEY).await {
        Ok(Some(raw)) => {
            return raw.parse().unwrap_or_else(|err| {
                warn!(%err, "ignoring stored theme preference");
                ThemePreference::default()
            });
        }
        Ok(None) => {}
        Err(err) => {
            warn!(error = %err, "failed to read theme preference");
            return ThemePreference::default();
        }
    }

    match store.get(UI_STATE_KEY).await {
        Ok(Some(raw)) => match serde_json::from_str::<UiStateBlob>(&raw) {
            Ok(blob) => blob.theme,
            Err(err) => {
                warn!(%err, "ignoring unreadable ui state blob");
                ThemePreference::default()
            }
        },
        Ok(None) => {
            debug!("no stored theme preference; using default");
            ThemePreference::default()
        }
        Err(err) => {
            warn!(error = %err, "failed to read ui state blob");
            ThemePreference::default()
        }
    }
}

pub async fn persist_theme(
    store: &dyn PreferenceStore,
    theme: ThemePreference,
    now: DateTime<Utc>,
) -> Result<()> {
    store.set(THEME_KEY, theme.as_str()).await?;
    let blob = serde_json::to_string(&UiStateBlob {
        theme,
        timestamp: now,
    })
    .context("failed to encode ui state blob")?;
    store.set(UI_STATE_KEY, &blob).await
}

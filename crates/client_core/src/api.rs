use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::protocol::{
    CharacterInfo, EmotionSnapshot, HistoryEntry, MemoryStats, CHARACTER_PATH, CHAT_HISTORY_PATH,
    CURRENT_EMOTION_PATH, MEMORY_STATS_PATH,
};
use tracing::debug;

/// Request/response endpoints of the companion backend.
#[async_trait]
pub trait CompanionApi: Send + Sync {
    async fn chat_history(&self) -> Result<Vec<HistoryEntry>>;
    async fn memory_stats(&self) -> Result<MemoryStats>;
    async fn current_emotion(&self) -> Result<EmotionSnapshot>;
    async fn character(&self) -> Result<CharacterInfo>;
}

pub struct HttpCompanionApi {
    http: Client,
    server_url: String,
}

impl HttpCompanionApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { http, server_url }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.server_url);
        debug!(%url, "fetching");
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("request to {url} was rejected"))?;
        res.json()
            .await
            .with_context(|| format!("invalid response body from {url}"))
    }
}

#[async_trait]
impl CompanionApi for HttpCompanionApi {
    async fn chat_history(&self) -> Result<Vec<HistoryEntry>> {
        self.get_json(CHAT_HISTORY_PATH).await
    }

    async fn memory_stats(&self) -> Result<MemoryStats> {
        self.get_json(MEMORY_STATS_PATH).await
    }

    async fn current_emotion(&self) -> Result<EmotionSnapshot> {
        self.get_json(CURRENT_EMOTION_PATH).await
    }

    async fn character(&self) -> Result<CharacterInfo> {
        self.get_json(CHARACTER_PATH).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;

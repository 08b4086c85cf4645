use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    domain::{EmotionalState, DEFAULT_EMOTION, DEFAULT_INTENSITY},
    error::ProtocolError,
    socketio::Packet,
};

pub const CHAT_HISTORY_PATH: &str = "/api/chat/history";
pub const MEMORY_STATS_PATH: &str = "/api/memory/stats";
pub const CURRENT_EMOTION_PATH: &str = "/api/emotions/current";
pub const CHARACTER_PATH: &str = "/api/character";

/// Commands the client pushes over the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    SendMessage { message: String },
    UpdateSettings(Map<String, Value>),
    GetServicesStatus,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::UpdateSettings(_) => "update_settings",
            Self::GetServicesStatus => "get_services_status",
        }
    }

    pub fn to_packet(&self) -> Packet {
        let args = match self {
            Self::SendMessage { message } => vec![json!({ "message": message })],
            Self::UpdateSettings(settings) => vec![Value::Object(settings.clone())],
            Self::GetServicesStatus => Vec::new(),
        };
        Packet::event(self.name(), args)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_packet().encode()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponsePayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
}

impl AiResponsePayload {
    /// Blank labels count as missing.
    pub fn emotion_or_default(&self) -> &str {
        self.emotion
            .as_deref()
            .map(str::trim)
            .filter(|emotion| !emotion.is_empty())
            .unwrap_or(DEFAULT_EMOTION)
    }

    pub fn emotional_state(&self) -> EmotionalState {
        EmotionalState::new(
            self.emotion_or_default(),
            self.intensity.unwrap_or(DEFAULT_INTENSITY),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdatedPayload {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SettingsUpdatedPayload {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Events the backend pushes over the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectedPayload),
    AiResponse(AiResponsePayload),
    ServicesStatus(Value),
    SettingsUpdated(SettingsUpdatedPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::AiResponse(_) => "ai_response",
            Self::ServicesStatus(_) => "services_status",
            Self::SettingsUpdated(_) => "settings_updated",
        }
    }

    /// Interprets a named event; only the first argument is used as payload.
    pub fn from_event(name: &str, args: Vec<Value>) -> Result<Self, ProtocolError> {
        let data = args.into_iter().next().unwrap_or(Value::Null);
        match name {
            "connected" => Ok(Self::Connected(payload_or_default(data)?)),
            "ai_response" => Ok(Self::AiResponse(serde_json::from_value(data)?)),
            "services_status" => Ok(Self::ServicesStatus(data)),
            "settings_updated" => Ok(Self::SettingsUpdated(serde_json::from_value(data)?)),
            other => Err(ProtocolError::UnsupportedEvent(other.to_string())),
        }
    }

    pub fn to_packet(&self) -> Result<Packet, serde_json::Error> {
        let data = match self {
            Self::Connected(payload) => serde_json::to_value(payload)?,
            Self::AiResponse(payload) => serde_json::to_value(payload)?,
            Self::ServicesStatus(status) => status.clone(),
            Self::SettingsUpdated(payload) => serde_json::to_value(payload)?,
        };
        Ok(Packet::event(self.name(), vec![data]))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_packet()?.encode()
    }

    /// Decodes a single event frame such as `42["ai_response",{...}]`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match Packet::decode(text)? {
            Packet::Event { name, args } => Self::from_event(&name, args),
            _ => Err(ProtocolError::InvalidPacket(text.to_string())),
        }
    }
}

fn payload_or_default<T: DeserializeOwned + Default>(data: Value) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(data)?)
}

/// History timestamps arrive either as epoch seconds or as ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryTimestamp {
    Epoch(f64),
    Text(String),
}

impl HistoryTimestamp {
    pub fn to_local(&self) -> Option<DateTime<Local>> {
        match self {
            Self::Epoch(secs) => {
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.floor();
                let nanos = (((secs - whole) * 1e9) as u32).min(999_999_999);
                let whole = whole as i64;
                Utc.timestamp_opt(whole, nanos)
                    .single()
                    .map(|utc| utc.with_timezone(&Local))
            }
            Self::Text(raw) => {
                let raw = raw.trim();
                if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                    return Some(parsed.with_timezone(&Local));
                }
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            }
        }
    }

    /// Display form used in the transcript; unparsable text is shown as-is.
    pub fn display(&self) -> String {
        match (self.to_local(), self) {
            (Some(local), _) => local.format(crate::TIME_FORMAT).to_string(),
            (None, Self::Text(raw)) => raw.clone(),
            (None, Self::Epoch(secs)) => secs.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user: String,
    pub ai: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<HistoryTimestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub total_memories: u64,
    #[serde(default)]
    pub vector_memory_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSnapshot {
    pub primary_emotion: String,
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub secondary_emotions: Map<String, Value>,
}

impl EmotionSnapshot {
    pub fn emotional_state(&self) -> EmotionalState {
        EmotionalState::new(self.primary_emotion.clone(), self.intensity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub name: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub personality: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;

//! Line-oriented front-end: renders session updates to a writer and turns
//! typed lines into [`UserAction`]s.

use std::io::Write;

use client_core::{RenderedMessage, UserAction, View};
use serde_json::{Map, Value};
use shared::{
    domain::{
        ConnectionState, EmotionalState, Notification, Sender, ThemePreference,
        DEFAULT_CHARACTER_NAME,
    },
    protocol::MemoryStats,
};
use tracing::{debug, warn};

pub const HELP: &str = "\
commands:
  /theme              toggle dark/light theme
  /clear              clear the local transcript
  /status             ask the backend for service status
  /set key=value ...  update backend settings (values parsed as JSON)
  /dismiss [id]       dismiss one notification, or all of them
  /help               show this help
  /quit               leave
  //text             send a message that starts with '/'";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Action(UserAction),
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(Input::Action(UserAction::SendMessage(format!("/{literal}"))));
    }
    let Some(command) = line.trim_start().strip_prefix('/') else {
        return Ok(Input::Action(UserAction::SendMessage(line.to_string())));
    };

    let mut words = command.split_whitespace();
    let name = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();
    let action = match (name, rest.as_slice()) {
        ("theme", []) => UserAction::ToggleTheme,
        ("clear", []) => UserAction::ClearChat,
        ("status", []) => UserAction::RequestServicesStatus,
        ("dismiss", []) => UserAction::DismissAllNotifications,
        ("dismiss", [id]) => UserAction::DismissNotification(
            id.parse()
                .map_err(|_| format!("'{id}' is not a notification id"))?,
        ),
        ("set", pairs) if !pairs.is_empty() => UserAction::UpdateSettings(parse_settings(pairs)?),
        ("set", _) => return Err("usage: /set key=value ...".into()),
        ("help", _) => return Ok(Input::Help),
        ("quit" | "exit", _) => return Ok(Input::Quit),
        (name, _) => return Err(format!("unknown command '/{name}', try /help")),
    };
    Ok(Input::Action(action))
}

fn parse_settings(pairs: &[&str]) -> Result<Map<String, Value>, String> {
    let mut settings = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        settings.insert(key.to_string(), value);
    }
    Ok(settings)
}

/// Drops control characters so backend text cannot drive the terminal.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect()
}

pub struct TerminalView<W> {
    out: W,
    character: String,
}

impl<W: Write + Send> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            character: DEFAULT_CHARACTER_NAME.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(err) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            warn!(error = %err, "failed to write to terminal");
        }
    }
}

impl<W: Write + Send> View for TerminalView<W> {
    fn append_message(&mut self, rendered: &RenderedMessage) {
        let message = &rendered.message;
        let speaker = match message.sender {
            Sender::User => "You".to_string(),
            Sender::Ai => match message.emotion.as_deref() {
                Some(emotion) => format!("{} ({})", self.character, sanitize(emotion)),
                None => self.character.clone(),
            },
        };
        let text = format!(
            "[{}] {speaker}: {}",
            sanitize(&message.timestamp),
            sanitize(&message.text)
        );
        self.line(&text);
    }

    fn clear_messages(&mut self) {
        self.line("-- chat cleared --");
    }

    fn set_connection_status(&mut self, state: ConnectionState) {
        self.line(&format!("* {}", state.label()));
    }

    fn set_emotion(&mut self, state: &EmotionalState) {
        self.line(&format!(
            "* mood: {} ({}%)",
            sanitize(&state.primary_emotion),
            state.percent()
        ));
    }

    fn apply_theme(&mut self, theme: ThemePreference) {
        self.line(&format!("* theme: {theme}"));
    }

    fn set_memory_stats(&mut self, stats: &MemoryStats) {
        let vector = if stats.vector_memory_enabled { "on" } else { "off" };
        self.line(&format!(
            "* memories: {} (vector search {vector})",
            stats.total_memories
        ));
    }

    fn set_character_name(&mut self, name: &str) {
        self.character = sanitize(name);
        let text = format!("* chatting with {}", self.character);
        self.line(&text);
    }

    fn show_notification(&mut self, notification: &Notification) {
        self.line(&format!(
            "! [{}] #{} {}",
            notification.severity.as_str(),
            notification.id,
            sanitize(&notification.message)
        ));
    }

    fn dismiss_notification(&mut self, id: u64) {
        // Printed lines cannot be retracted.
        debug!(id, "notification dismissed");
    }
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;

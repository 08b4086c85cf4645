//! The session controller: single owner of the live connection and of all UI
//! state (transcript, connection indicator, emotion gauge, theme,
//! notifications).
//!
//! All work happens on one cooperative loop ([`SessionController::run`]).
//! Backend fetches run as spawned tasks that report back through a completion
//! channel, so the loop never waits on the network.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use shared::{
    domain::{
        ChatMessage, ConnectionState, EmotionalState, Notification, Sender, Severity,
        ThemePreference, DEFAULT_CHARACTER_NAME,
    },
    protocol::{
        AiResponsePayload, CharacterInfo, ClientCommand, ConnectedPayload, EmotionSnapshot,
        HistoryEntry, MemoryStats, ServerEvent, SettingsUpdatedPayload,
    },
};
use storage::{persist_theme, restore_theme, PreferenceStore};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, mpsc},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    api::CompanionApi,
    markup::now_timestamp,
    transcript::Transcript,
    transport::{Transport, TransportEvent},
    view::View,
};

pub const EMOTION_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub emotion_poll_interval: Duration,
    pub liveness_check_interval: Duration,
    pub notification_ttl: Duration,
    /// Re-fetch history after the link comes back from a disconnect.
    pub resync_history_on_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            emotion_poll_interval: EMOTION_POLL_INTERVAL,
            liveness_check_interval: LIVENESS_CHECK_INTERVAL,
            notification_ttl: NOTIFICATION_TTL,
            resync_history_on_reconnect: false,
        }
    }
}

/// Things a user can ask the session to do.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    SendMessage(String),
    ToggleTheme,
    ClearChat,
    UpdateSettings(Map<String, Value>),
    RequestServicesStatus,
    DismissNotification(u64),
    DismissAllNotifications,
}

enum Completion {
    History(Result<Vec<HistoryEntry>>),
    Emotion(Result<EmotionSnapshot>),
    MemoryStats(Result<MemoryStats>),
    Character(Result<CharacterInfo>),
    NotificationExpired(u64),
}

pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    api: Arc<dyn CompanionApi>,
    store: Arc<dyn PreferenceStore>,
    view: Box<dyn View>,
    transport_events: broadcast::Receiver<TransportEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    connection: ConnectionState,
    seen_disconnect: bool,
    transcript: Transcript,
    emotion: EmotionalState,
    theme: ThemePreference,
    memory_stats: Option<MemoryStats>,
    services_status: Option<Value>,
    character_name: String,
    notifications: Vec<Notification>,
    next_notification_id: u64,
    pending_fetches: usize,
    emotion_poll_in_flight: bool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        api: Arc<dyn CompanionApi>,
        store: Arc<dyn PreferenceStore>,
        view: Box<dyn View>,
    ) -> Self {
        // Subscribe before anything can connect so no lifecycle event is missed.
        let transport_events = transport.subscribe();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            api,
            store,
            view,
            transport_events,
            completions_tx,
            completions_rx,
            connection: ConnectionState::Disconnected,
            seen_disconnect: false,
            transcript: Transcript::new(),
            emotion: EmotionalState::default(),
            theme: ThemePreference::default(),
            memory_stats: None,
            services_status: None,
            character_name: DEFAULT_CHARACTER_NAME.to_string(),
            notifications: Vec::new(),
            next_notification_id: 1,
            pending_fetches: 0,
            emotion_poll_in_flight: false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn emotional_state(&self) -> &EmotionalState {
        &self.emotion
    }

    pub fn theme(&self) -> ThemePreference {
        self.theme
    }

    pub fn memory_stats(&self) -> Option<&MemoryStats> {
        self.memory_stats.as_ref()
    }

    pub fn services_status(&self) -> Option<&Value> {
        self.services_status.as_ref()
    }

    pub fn character_name(&self) -> &str {
        &self.character_name
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Connects, restores the theme and kicks off the initial loads.
    pub async fn initialize(&mut self) {
        self.view.set_connection_status(self.connection);
        self.view.set_emotion(&self.emotion);
        self.view.set_character_name(&self.character_name);
        self.transport.connect();

        self.theme = restore_theme(self.store.as_ref()).await;
        self.view.apply_theme(self.theme);
        info!(theme = %self.theme, "session initialized");

        self.load_history();
        self.poll_emotion();
        self.load_memory_stats();
        self.load_character();
    }

    /// Drives the session until `actions` is closed, then hands the
    /// controller back.
    pub async fn run(mut self, mut actions: mpsc::Receiver<UserAction>) -> Self {
        self.initialize().await;

        let mut emotion_tick = interval_after(self.config.emotion_poll_interval);
        let mut liveness_tick = interval_after(self.config.liveness_check_interval);

        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => self.handle_action(action).await,
                    None => {
                        info!("action channel closed; ending session");
                        break;
                    }
                },
                event = self.transport_events.recv() => match event {
                    Ok(event) => self.handle_transport_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "transport events lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!("transport event channel closed; ending session");
                        break;
                    }
                },
                Some(completion) = self.completions_rx.recv() => self.apply_completion(completion),
                _ = emotion_tick.tick() => self.poll_emotion(),
                _ = liveness_tick.tick() => self.check_liveness(),
            }
        }

        self
    }

    /// Applies completions until no backend fetch is outstanding.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(completion) = self.completions_rx.try_recv() {
                self.apply_completion(completion);
            }
            if self.pending_fetches == 0 {
                return;
            }
            if let Some(completion) = self.completions_rx.recv().await {
                self.apply_completion(completion);
            }
        }
    }

    pub async fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::SendMessage(text) => self.send_message(&text),
            UserAction::ToggleTheme => self.toggle_theme().await,
            UserAction::ClearChat => self.clear_chat(),
            UserAction::UpdateSettings(settings) => self.update_settings(settings),
            UserAction::RequestServicesStatus => self.request_services_status(),
            UserAction::DismissNotification(id) => self.dismiss_notification(id),
            UserAction::DismissAllNotifications => self.dismiss_all_notifications(),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connect(),
            TransportEvent::Disconnected => self.on_disconnect(),
            TransportEvent::Server(event) => self.handle_server_event(event),
        }
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(payload) => self.on_server_connected(payload),
            ServerEvent::AiResponse(payload) => self.on_ai_response(payload),
            ServerEvent::ServicesStatus(status) => self.on_services_status(status),
            ServerEvent::SettingsUpdated(payload) => self.on_settings_updated(payload),
        }
    }

    /// Shows the message right away and fires it at the backend. Blank input
    /// is ignored; a down link drops the command.
    pub fn send_message(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        self.append(ChatMessage::user(text, now_timestamp()));

        let command = ClientCommand::SendMessage {
            message: text.to_string(),
        };
        match self.transport.emit(&command) {
            Ok(()) => debug!("message sent"),
            Err(err) => debug!(error = %err, "outbound message dropped"),
        }
    }

    pub fn on_ai_response(&mut self, payload: AiResponsePayload) {
        let emotion = payload.emotion_or_default().to_string();
        let state = payload.emotional_state();
        self.append(ChatMessage::ai(payload.message, emotion, now_timestamp()));
        self.set_emotion(state);
    }

    pub fn on_connect(&mut self) {
        let reconnect = self.seen_disconnect;
        self.connection = ConnectionState::Connected;
        self.view.set_connection_status(self.connection);
        info!(reconnect, "connected to companion backend");

        if reconnect && self.config.resync_history_on_reconnect {
            self.load_history();
        }
    }

    pub fn on_disconnect(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.seen_disconnect = true;
        self.view.set_connection_status(self.connection);
        warn!("disconnected from companion backend");
    }

    fn on_server_connected(&mut self, payload: ConnectedPayload) {
        debug!(message = ?payload.message, "backend confirmed connection");
        if let Some(name) = payload.character.filter(|name| !name.trim().is_empty()) {
            self.set_character_name(name);
        }
    }

    fn on_services_status(&mut self, status: Value) {
        debug!(%status, "services status received");
        self.services_status = Some(status);
    }

    fn on_settings_updated(&mut self, payload: SettingsUpdatedPayload) {
        if payload.is_success() {
            info!("settings updated");
            self.notify("Settings updated", Severity::Success);
        } else {
            let reason = payload
                .message
                .unwrap_or_else(|| format!("status `{}`", payload.status));
            warn!(%reason, "settings update rejected");
            self.notify(format!("Failed to update settings: {reason}"), Severity::Error);
        }
    }

    pub async fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        self.view.apply_theme(self.theme);
        if let Err(err) = persist_theme(self.store.as_ref(), self.theme, Utc::now()).await {
            warn!(error = %err, theme = %self.theme, "failed to persist theme");
        }
    }

    /// Local only; server-side history is untouched.
    pub fn clear_chat(&mut self) {
        self.transcript.clear();
        self.view.clear_messages();
    }

    pub fn update_settings(&mut self, settings: Map<String, Value>) {
        let command = ClientCommand::UpdateSettings(settings);
        if let Err(err) = self.transport.emit(&command) {
            warn!(error = %err, "settings update not sent");
            self.notify(format!("Failed to update settings: {err}"), Severity::Error);
        }
    }

    pub fn request_services_status(&mut self) {
        if let Err(err) = self.transport.emit(&ClientCommand::GetServicesStatus) {
            debug!(error = %err, "services status request dropped");
        }
    }

    /// Shows a banner that expires on its own after the configured TTL.
    pub fn notify(&mut self, message: impl Into<String>, severity: Severity) -> u64 {
        let id = self.next_notification_id;
        self.next_notification_id += 1;
        let notification = Notification {
            id,
            message: message.into(),
            severity,
        };
        self.view.show_notification(&notification);
        self.notifications.push(notification);

        let ttl = self.config.notification_ttl;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            time::sleep(ttl).await;
            let _ = tx.send(Completion::NotificationExpired(id));
        });
        id
    }

    pub fn dismiss_notification(&mut self, id: u64) {
        let Some(pos) = self.notifications.iter().position(|n| n.id == id) else {
            return;
        };
        self.notifications.remove(pos);
        self.view.dismiss_notification(id);
    }

    pub fn dismiss_all_notifications(&mut self) {
        for notification in std::mem::take(&mut self.notifications) {
            self.view.dismiss_notification(notification.id);
        }
    }

    pub fn check_liveness(&mut self) {
        if !self.connection.is_connected() {
            debug!("link down; reconnecting");
            self.transport.connect();
        }
    }

    /// Skipped while the previous poll is still outstanding.
    pub fn poll_emotion(&mut self) {
        if self.emotion_poll_in_flight {
            debug!("emotion poll still pending; skipping tick");
            return;
        }
        self.emotion_poll_in_flight = true;
        self.spawn_fetch(
            |api| async move { api.current_emotion().await },
            Completion::Emotion,
        );
    }

    fn load_history(&mut self) {
        self.spawn_fetch(
            |api| async move { api.chat_history().await },
            Completion::History,
        );
    }

    fn load_memory_stats(&mut self) {
        self.spawn_fetch(
            |api| async move { api.memory_stats().await },
            Completion::MemoryStats,
        );
    }

    fn load_character(&mut self) {
        self.spawn_fetch(
            |api| async move { api.character().await },
            Completion::Character,
        );
    }

    fn spawn_fetch<T, F, Fut>(&mut self, fetch: F, complete: fn(Result<T>) -> Completion)
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn CompanionApi>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.pending_fetches += 1;
        let fut = fetch(Arc::clone(&self.api));
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(complete(fut.await));
        });
    }

    fn apply_completion(&mut self, completion: Completion) {
        match completion {
            Completion::NotificationExpired(id) => {
                self.dismiss_notification(id);
                return;
            }
            Completion::History(result) => match result {
                Ok(entries) => self.apply_history(entries),
                Err(err) => warn!(error = %err, "failed to load chat history"),
            },
            Completion::Emotion(result) => {
                self.emotion_poll_in_flight = false;
                match result {
                    Ok(snapshot) => self.set_emotion(snapshot.emotional_state()),
                    Err(err) => warn!(error = %err, "failed to refresh emotional state"),
                }
            }
            Completion::MemoryStats(result) => match result {
                Ok(stats) => {
                    self.view.set_memory_stats(&stats);
                    self.memory_stats = Some(stats);
                }
                Err(err) => warn!(error = %err, "failed to load memory stats"),
            },
            Completion::Character(result) => match result {
                Ok(info) if !info.name.trim().is_empty() => self.set_character_name(info.name),
                Ok(_) => debug!("backend reported no character name"),
                Err(err) => warn!(error = %err, "failed to load character info"),
            },
        }
        self.pending_fetches = self.pending_fetches.saturating_sub(1);
    }

    fn apply_history(&mut self, entries: Vec<HistoryEntry>) {
        info!(entries = entries.len(), "chat history loaded");
        for entry in entries {
            let timestamp = entry
                .timestamp
                .as_ref()
                .map(|stamp| stamp.display())
                .unwrap_or_default();
            let emotion = entry.emotion.filter(|emotion| !emotion.trim().is_empty());
            self.append(ChatMessage::user(entry.user, timestamp.clone()));
            self.append(ChatMessage {
                sender: Sender::Ai,
                text: entry.ai,
                emotion,
                timestamp,
            });
        }
    }

    fn append(&mut self, message: ChatMessage) {
        let rendered = self.transcript.push(message);
        self.view.append_message(rendered);
    }

    fn set_emotion(&mut self, state: EmotionalState) {
        if state == self.emotion {
            return;
        }
        self.emotion = state;
        self.view.set_emotion(&self.emotion);
    }

    fn set_character_name(&mut self, name: String) {
        self.view.set_character_name(&name);
        self.character_name = name;
    }
}

fn interval_after(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

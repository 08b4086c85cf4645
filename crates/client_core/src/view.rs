//! Presentation surface driven by the session controller.

use shared::{
    domain::{ConnectionState, EmotionalState, Notification, ThemePreference},
    protocol::MemoryStats,
};

use crate::markup::RenderedMessage;

pub trait View: Send {
    fn append_message(&mut self, rendered: &RenderedMessage);
    fn clear_messages(&mut self);
    fn set_connection_status(&mut self, state: ConnectionState);
    fn set_emotion(&mut self, state: &EmotionalState);
    fn apply_theme(&mut self, theme: ThemePreference);
    fn set_memory_stats(&mut self, stats: &MemoryStats);
    fn set_character_name(&mut self, name: &str);
    fn show_notification(&mut self, notification: &Notification);
    fn dismiss_notification(&mut self, id: u64);
}

use shared::domain::ChatMessage;

use crate::markup::{render_message, RenderedMessage};

/// Messages currently on screen, in arrival order.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<RenderedMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> &RenderedMessage {
        self.entries.push(render_message(&message));
        &self.entries[self.entries.len() - 1]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&RenderedMessage> {
        self.entries.last()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|entry| &entry.message)
    }
}

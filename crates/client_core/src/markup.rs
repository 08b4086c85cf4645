//! Safe rendering of chat messages into markup fragments.
//!
//! Every string that originates from the user or the backend passes through
//! [`escape_html`] before it is placed into a fragment.

use chrono::Local;
use shared::{domain::ChatMessage, TIME_FORMAT};

/// Neutralises markup-significant characters and turns newlines into `<br>`.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => escaped.push_str("<br>"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message: ChatMessage,
    /// Escaped message text.
    pub body: String,
    /// Complete fragment for the transcript.
    pub html: String,
}

pub fn render_message(message: &ChatMessage) -> RenderedMessage {
    let body = escape_html(&message.text);
    let mut html = format!(
        r#"<div class="message {}"><div class="message-content">{}</div><div class="message-meta"><span class="timestamp">{}</span>"#,
        message.sender.css_class(),
        body,
        escape_html(&message.timestamp),
    );
    if let Some(emotion) = message.emotion.as_deref() {
        html.push_str(&format!(
            r#"<span class="emotion-tag">{}</span>"#,
            escape_html(emotion)
        ));
    }
    html.push_str("</div></div>");

    RenderedMessage {
        message: message.clone(),
        body,
        html,
    }
}

pub fn now_timestamp() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

#[cfg(test)]
#[path = "tests/markup_tests.rs"]
mod tests;

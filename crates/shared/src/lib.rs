pub mod domain;
pub mod error;
pub mod protocol;
pub mod socketio;

/// Clock format shown next to transcript messages.
pub const TIME_FORMAT: &str = "%H:%M:%S";

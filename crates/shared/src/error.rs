use thiserror::Error;

/// Failure to interpret a frame received over the event channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid socket packet `{0}`")]
    InvalidPacket(String),
    #[error("unsupported socket packet type `{0}`")]
    UnsupportedPacket(String),
    #[error("packet for namespace `{0}`")]
    ForeignNamespace(String),
    #[error("unsupported event `{0}`")]
    UnsupportedEvent(String),
}

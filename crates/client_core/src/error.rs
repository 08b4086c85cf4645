use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("invalid server url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to encode `{command}` command: {source}")]
    Encode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

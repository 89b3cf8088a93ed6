use thiserror::Error;

/// Errors produced while setting up or running a relay instance.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection to the upstream service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The upstream service rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket transport error on either leg
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// A message could not be parsed or re-encoded
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::ProtocolError(err.to_string())
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

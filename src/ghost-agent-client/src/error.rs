#[derive(Debug, thiserror::Error)]
pub enum GhostClientError {
    #[error("not connected to guest agent")]
    NotConnected,
    #[error("request to guest agent timed out")]
    Timeout,
    #[error("failed to decode guest agent response: {0}")]
    Decode(String),
    #[error("failed to encode request body: {0}")]
    Encode(String),
    #[error("guest agent returned status {0}")]
    Status(u16),
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for GhostClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GhostClientError::Timeout
        } else if e.is_decode() {
            GhostClientError::Decode(e.to_string())
        } else if e.is_connect() {
            GhostClientError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            GhostClientError::Status(status.as_u16())
        } else {
            GhostClientError::Connection(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GhostClientError>;

/// Error types for the synchronization core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("not connected to the chat server")]
    NotConnected,

    #[error("no conversation is selected")]
    NoActiveConversation,

    #[error("message body is empty")]
    EmptyMessage,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("request failed: {0}")]
    FetchFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Error types for the messaging client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Room error: {0}")]
    Room(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

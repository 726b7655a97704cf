//! Errors raised while encoding records or talking to a document store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A record could not be turned into JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Incoming JSON was malformed or had the wrong shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A document parsed as JSON but is not the expected record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Collection or document id is empty or contains `/`.
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    /// The realtime connection dropped or could not be opened.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A request could not be built or was refused.
    #[error("request failed: {0}")]
    RequestFailed(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match err.classify() {
            Category::Io => ProtocolError::Serialization(err.to_string()),
            Category::Syntax | Category::Data | Category::Eof => {
                ProtocolError::Deserialization(err.to_string())
            }
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let message = err.to_string();
        match err.kind() {
            TimedOut | WouldBlock => ProtocolError::Timeout(message),
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe | UnexpectedEof => ProtocolError::ConnectionClosed(message),
            _ => ProtocolError::RequestFailed(message),
        }
    }
}

//! Client error types.

use std::io;

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] stomplite_core::ProtocolError),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(e) => ClientError::Io(e),
            other => ClientError::WebSocket(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

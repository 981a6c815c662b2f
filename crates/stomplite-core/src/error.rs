//! Error types for frame encoding and decoding.

use thiserror::Error;

/// STOMP protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Frame has no command line")]
    MissingCommand,

    #[error("Frame terminated before the header/body divider")]
    MissingDivider,

    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("Invalid UTF-8 in frame headers")]
    InvalidUtf8,

    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("Body of {0} bytes is not followed by NUL")]
    MissingTerminator(usize),

    #[error("Frame too large: {size} bytes buffered, max is {max}")]
    FrameTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

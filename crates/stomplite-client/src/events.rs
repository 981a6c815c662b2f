//! Session state and the values handed to session-level callbacks.

use std::fmt;

use stomplite_core::{Command, Frame, ProtocolError};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport open requested, waiting for CONNECTED.
    Connecting,
    Connected,
}

/// A failure reported to the session error callback.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The broker sent an ERROR frame. The session stays connected.
    Broker(Frame),
    /// The transport failed to open or was lost. The session is now disconnected.
    Transport(String),
}

impl Failure {
    /// The ERROR frame, if the broker sent one.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Failure::Broker(frame) => Some(frame),
            Failure::Transport(_) => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Broker(frame) => match frame.get("message") {
                Some(message) => write!(f, "broker error: {}", message),
                None => write!(f, "broker error: {}", frame.body_str().unwrap_or("")),
            },
            Failure::Transport(reason) => f.write_str(reason),
        }
    }
}

/// Frames the session dropped without surfacing an error.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A malformed frame was skipped.
    MalformedFrame(ProtocolError),
    /// A MESSAGE named a subscription that is not registered.
    UnmatchedSubscription(Option<String>),
    /// A frame arrived that the session does not handle in its current state.
    UnexpectedFrame(Command),
}

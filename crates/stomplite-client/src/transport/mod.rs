//! Transport adapters.
//!
//! A transport is a byte channel the session sends encoded frames through.
//! It reports what happened on the channel as `TransportEvent`s, which the
//! session pulls with `poll` (or a host event loop feeds to
//! `Client::handle_event` directly).
//!
//! Provided adapters:
//! - `TcpTransport`: raw stream socket, frames found only by NUL delimiters
//! - `WebSocketTransport`: WebSocket message channel

mod tcp;
mod websocket;

#[cfg(test)]
pub(crate) mod scripted;

use std::io;
use std::time::Duration;

use bytes::Bytes;

pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open and `send` may be used.
    Opened,
    /// Raw bytes arrived. May hold part of a frame or several frames.
    Data(Bytes),
    /// The channel closed or failed.
    Closed(Option<String>),
}

/// Byte channel used by the session.
pub trait Transport {
    /// Begin establishing the channel. `Opened` or `Closed` follows from `poll`.
    fn open(&mut self) -> io::Result<()>;

    /// Send encoded frame bytes. Valid only after `Opened`.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the channel. Calling it again is a no-op.
    fn close(&mut self);

    /// Wait up to `timeout` (`None` = forever) for activity and append the
    /// resulting events to `events`.
    fn poll(&mut self, timeout: Option<Duration>, events: &mut Vec<TransportEvent>)
        -> io::Result<()>;

    /// Remote endpoint, used in error messages.
    fn endpoint(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<()> {
        (**self).poll(timeout, events)
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

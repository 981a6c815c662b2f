//! WebSocket transport.
//!
//! Wraps a tungstenite client connection over a non-blocking mio
//! `TcpStream`. `open` only starts the TCP connect; the HTTP upgrade is
//! driven from `poll`, retrying the mid-handshake state each time the socket
//! is ready. Each STOMP frame goes out as one WebSocket message; inbound Text
//! and Binary messages are both handed to the codec as bytes.

use std::io;
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::debug;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::{ClientHandshake, Request};
use tungstenite::handshake::{HandshakeError, MidHandshake};
use tungstenite::http::HeaderValue;
use tungstenite::{Message, WebSocket};

use super::{Transport, TransportEvent};

/// STOMP WebSocket sub-protocols offered during the handshake.
pub const STOMP_SUBPROTOCOLS: &str = "v10.stomp, v11.stomp, v12.stomp";

const STREAM: Token = Token(0);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

enum Stage {
    Idle,
    /// TCP connect in flight.
    Connecting {
        stream: TcpStream,
        request: Request,
        deadline: Instant,
    },
    /// HTTP upgrade in flight.
    Handshaking {
        handshake: MidHandshake<ClientHandshake<TcpStream>>,
        deadline: Instant,
    },
    Open(WebSocket<TcpStream>),
}

impl Stage {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Stage::Connecting { deadline, .. } | Stage::Handshaking { deadline, .. } => {
                Some(*deadline)
            }
            Stage::Idle | Stage::Open(_) => None,
        }
    }
}

/// STOMP over a WebSocket connection (`ws://` URLs).
pub struct WebSocketTransport {
    url: String,
    protocols: String,
    connect_timeout: Duration,
    poll: Option<Poll>,
    stage: Stage,
}

impl WebSocketTransport {
    /// Create a transport for `url`. Nothing connects until `open`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: STOMP_SUBPROTOCOLS.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll: None,
            stage: Stage::Idle,
        }
    }

    /// Bound on the TCP connect plus the HTTP upgrade.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the `Sec-WebSocket-Protocol` value (comma-separated).
    pub fn protocols(mut self, protocols: impl Into<String>) -> Self {
        self.protocols = protocols.into();
        self
    }

    fn request(&self) -> io::Result<Request> {
        if !self.url.starts_with("ws://") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported WebSocket URL: {}", self.url),
            ));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(io::Error::other)?;

        if !self.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.protocols).map_err(io::Error::other)?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }
        Ok(request)
    }

    /// Move the connection one step forward after the socket reported
    /// readiness.
    fn advance(&mut self, events: &mut Vec<TransportEvent>) {
        let stage = std::mem::replace(&mut self.stage, Stage::Idle);
        let result = match stage {
            Stage::Connecting {
                mut stream,
                request,
                deadline,
            } => match connected(&mut stream) {
                Ok(true) => handshake_step(tungstenite::client(request, stream), deadline),
                Ok(false) => Ok(Stage::Connecting {
                    stream,
                    request,
                    deadline,
                }),
                Err(e) => Err(e.to_string()),
            },
            Stage::Handshaking {
                handshake,
                deadline,
            } => handshake_step(handshake.handshake(), deadline),
            other => Ok(other),
        };

        match result {
            Ok(stage) => {
                let opened = matches!(stage, Stage::Open(_));
                self.stage = stage;
                if opened {
                    events.push(TransportEvent::Opened);
                    // The upgrade response may have carried the first frames.
                    self.read_available(events);
                }
            }
            Err(reason) => self.lost(reason, events),
        }
    }

    fn read_available(&mut self, events: &mut Vec<TransportEvent>) {
        let Stage::Open(ws) = &mut self.stage else {
            return;
        };

        let mut closed = None;
        // Drain everything the socket holds; mio will not wake us again for it.
        loop {
            match ws.read() {
                Ok(Message::Text(text)) => {
                    let data = Bytes::copy_from_slice(text.as_str().as_bytes());
                    events.push(TransportEvent::Data(data));
                }
                Ok(Message::Binary(data)) => {
                    if !data.is_empty() {
                        events.push(TransportEvent::Data(data));
                    }
                }
                Ok(Message::Close(frame)) => {
                    closed = Some(match frame {
                        Some(f) => {
                            format!("closed by peer: {} {}", u16::from(f.code), f.reason.as_str())
                        }
                        None => "closed by peer".to_string(),
                    });
                    let _ = ws.flush();
                    break;
                }
                // tungstenite answers pings on its own
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    break;
                }
                Err(e) => {
                    closed = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(reason) = closed {
            self.lost(reason, events);
        }
    }

    /// Push out whatever tungstenite still has queued (frames, pongs).
    fn flush(&mut self, events: &mut Vec<TransportEvent>) {
        let Stage::Open(ws) = &mut self.stage else {
            return;
        };
        match ws.flush() {
            Ok(()) => {}
            Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.lost(e.to_string(), events),
        }
    }

    fn lost(&mut self, reason: String, events: &mut Vec<TransportEvent>) {
        self.stage = Stage::Idle;
        self.poll = None;
        events.push(TransportEvent::Closed(Some(reason)));
    }
}

/// Whether a non-blocking connect has completed.
fn connected(stream: &mut TcpStream) -> io::Result<bool> {
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    match stream.peer_addr() {
        Ok(_) => {
            stream.set_nodelay(true)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

type HandshakeResult = Result<
    (WebSocket<TcpStream>, tungstenite::handshake::client::Response),
    HandshakeError<ClientHandshake<TcpStream>>,
>;

fn handshake_step(result: HandshakeResult, deadline: Instant) -> Result<Stage, String> {
    match result {
        Ok((ws, response)) => {
            debug!(
                "WebSocket opened, sub-protocol {:?}",
                response.headers().get("Sec-WebSocket-Protocol")
            );
            Ok(Stage::Open(ws))
        }
        // Socket would block; resume on the next readiness event.
        Err(HandshakeError::Interrupted(handshake)) => Ok(Stage::Handshaking {
            handshake,
            deadline,
        }),
        Err(HandshakeError::Failure(e)) => Err(format!("WebSocket handshake failed: {}", e)),
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self) -> io::Result<()> {
        if !matches!(self.stage, Stage::Idle) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already open",
            ));
        }

        let request = self.request()?;
        let uri = request.uri();
        let host = uri
            .host()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?;
        let port = uri.port_u16().unwrap_or(80);
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not resolve address")
        })?;

        debug!("Opening WebSocket to {} ({})", self.url, addr);
        let mut stream = TcpStream::connect(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)?;

        self.poll = Some(poll);
        self.stage = Stage::Connecting {
            stream,
            request,
            deadline: Instant::now() + self.connect_timeout,
        };
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let Stage::Open(ws) = &mut self.stage else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport not open"));
        };

        let message = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_string()),
            Err(_) => Message::binary(data.to_vec()),
        };
        match ws.send(message) {
            Ok(()) => Ok(()),
            // Queued inside tungstenite; flushed when the socket is writable.
            Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(tungstenite::Error::Io(e)) => Err(e),
            Err(other) => Err(io::Error::other(other)),
        }
    }

    fn close(&mut self) {
        if let Stage::Open(ws) = &mut self.stage {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
        self.stage = Stage::Idle;
        self.poll = None;
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<()> {
        let before = events.len();
        self.read_available(events);
        if events.len() > before {
            return Ok(());
        }

        let deadline = self.stage.deadline();
        let Some(poll) = &mut self.poll else {
            return Ok(());
        };

        let timeout = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                Some(timeout.map_or(left, |t| t.min(left)))
            }
            None => timeout,
        };

        let mut ready = Events::with_capacity(16);
        match poll.poll(&mut ready, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        let woken = ready.iter().any(|event| event.token() == STREAM);

        if let Some(deadline) = deadline {
            if woken {
                self.advance(events);
            } else if Instant::now() >= deadline {
                self.lost(
                    format!("WebSocket connect timed out after {:?}", self.connect_timeout),
                    events,
                );
            }
            return Ok(());
        }

        if woken {
            self.flush(events);
            self.read_available(events);
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

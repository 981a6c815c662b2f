//! Raw TCP transport.
//!
//! A byte stream with no message framing: frame boundaries come entirely
//! from the NUL-delimited decoder. Uses mio for non-blocking I/O.

use std::io::{self, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::debug;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use super::{Transport, TransportEvent};

const STREAM: Token = Token(0);
const READ_CHUNK: usize = 4096;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// STOMP over a plain TCP connection.
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
    poll: Option<Poll>,
    stream: Option<TcpStream>,
    /// Set while the non-blocking connect is still in flight.
    connect_deadline: Option<Instant>,
    write_buf: Vec<u8>,
}

impl TcpTransport {
    /// Create a transport for `address` (host:port). Nothing connects until `open`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll: None,
            stream: None,
            connect_deadline: None,
            write_buf: Vec::new(),
        }
    }

    /// Set the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn flush_write_buffer(&mut self) -> io::Result<()> {
        if self.connect_deadline.is_some() {
            return Ok(());
        }
        let Some(stream) = &mut self.stream else {
            return Ok(());
        };

        // Write until the kernel pushes back; the rest waits for WRITABLE.
        let mut written = 0;
        while written < self.write_buf.len() {
            match stream.write(&self.write_buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written > 0 {
            self.write_buf.drain(..written);
        }
        Ok(())
    }

    fn read_available(&mut self, events: &mut Vec<TransportEvent>) {
        let Some(stream) = &mut self.stream else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut data = Vec::new();
        let mut closed = None;
        // Edge-triggered: drain the socket or the next event never comes.
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    closed = Some("connection closed by peer".to_string());
                    break;
                }
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    closed = Some(e.to_string());
                    break;
                }
            }
        }

        if !data.is_empty() {
            events.push(TransportEvent::Data(Bytes::from(data)));
        }
        if let Some(reason) = closed {
            self.cleanup();
            events.push(TransportEvent::Closed(Some(reason)));
        }
    }

    /// Check an in-flight connect after the socket reported readiness.
    ///
    /// Returns `Ok(true)` once connected and `Ok(false)` if the wakeup was
    /// spurious.
    fn finish_connect(&mut self) -> io::Result<bool> {
        let Some(stream) = &mut self.stream else {
            return Ok(false);
        };
        if let Some(e) = stream.take_error()? {
            return Err(e);
        }
        match stream.peer_addr() {
            Ok(addr) => {
                debug!("Connected to {}", addr);
                stream.set_nodelay(true)?;
                self.connect_deadline = None;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn cleanup(&mut self) {
        self.connect_deadline = None;
        if let Some(mut stream) = self.stream.take() {
            if let Some(poll) = &self.poll {
                let _ = poll.registry().deregister(&mut stream);
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.write_buf.clear();
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already open",
            ));
        }

        let addr = self.address.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not resolve address")
        })?;

        debug!("Connecting to {}", addr);
        // Returns at once; completion shows up as a WRITABLE event in `poll`.
        let mut stream = TcpStream::connect(addr)?;
        let poll = match self.poll.take() {
            Some(poll) => poll,
            None => Poll::new()?,
        };
        poll.registry()
            .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)?;

        self.poll = Some(poll);
        self.stream = Some(stream);
        self.connect_deadline = Some(Instant::now() + self.connect_timeout);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport not open"));
        }
        // Buffered first; whatever the socket refuses now goes out on WRITABLE.
        self.write_buf.extend_from_slice(data);
        self.flush_write_buffer()
    }

    fn close(&mut self) {
        if self.stream.is_some() {
            let _ = self.flush_write_buffer();
            self.cleanup();
        }
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<()> {
        let Some(poll) = &mut self.poll else {
            return Ok(());
        };
        if self.stream.is_none() {
            return Ok(());
        }

        // Never sleep past the connect deadline.
        let timeout = match self.connect_deadline {
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

        let mut readable = false;
        let mut writable = false;
        for event in ready.iter() {
            if event.token() == STREAM {
                readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                writable |= event.is_writable();
            }
        }

        if let Some(deadline) = self.connect_deadline {
            if readable || writable {
                match self.finish_connect() {
                    Ok(true) => events.push(TransportEvent::Opened),
                    Ok(false) => return Ok(()),
                    Err(e) => {
                        self.cleanup();
                        events.push(TransportEvent::Closed(Some(e.to_string())));
                        return Ok(());
                    }
                }
            } else if Instant::now() >= deadline {
                self.cleanup();
                events.push(TransportEvent::Closed(Some(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                ))));
                return Ok(());
            } else {
                return Ok(());
            }
        }

        if writable {
            if let Err(e) = self.flush_write_buffer() {
                self.cleanup();
                events.push(TransportEvent::Closed(Some(e.to_string())));
                return Ok(());
            }
        }
        if readable {
            self.read_available(events);
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.address
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn poll_until<F>(transport: &mut TcpTransport, mut done: F) -> Vec<TransportEvent>
    where
        F: FnMut(&[TransportEvent]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while !done(&events) && Instant::now() < deadline {
            transport
                .poll(Some(Duration::from_millis(50)), &mut events)
                .unwrap();
        }
        events
    }

    #[test]
    fn test_open_send_receive_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 256];
            while !received.contains(&0u8) {
                let n = socket.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"CONNECTED\nsession-id:1\n\n\0").unwrap();
            received
        });

        let mut transport = TcpTransport::new(addr.to_string());
        transport.open().unwrap();

        let opened = poll_until(&mut transport, |events| !events.is_empty());
        assert_eq!(opened, vec![TransportEvent::Opened]);

        transport.send(b"CONNECT\nlogin:u\n\n\0").unwrap();

        let events = poll_until(&mut transport, |events| {
            events
                .iter()
                .any(|e| matches!(e, TransportEvent::Closed(_)))
        });
        let data: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Data(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, b"CONNECTED\nsession-id:1\n\n\0");
        assert!(matches!(events.last(), Some(TransportEvent::Closed(Some(_)))));

        assert_eq!(server.join().unwrap(), b"CONNECT\nlogin:u\n\n\0");
        transport.close();
        transport.close();
    }

    #[test]
    fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpTransport::new(addr.to_string())
            .connect_timeout(Duration::from_millis(500));
        // Loopback may refuse at once or only once the connect is polled.
        if transport.open().is_ok() {
            let events = poll_until(&mut transport, |events| !events.is_empty());
            assert!(matches!(events.as_slice(), [TransportEvent::Closed(Some(_))]));
        }
        let err = transport.send(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_open_returns_before_connect_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut transport = TcpTransport::new(addr.to_string());
        transport.open().unwrap();
        assert!(transport.connect_deadline.is_some());

        // Frames queued before Opened go out once the connect completes.
        transport.send(b"CONNECT\n\n\0").unwrap();
        let events = poll_until(&mut transport, |events| !events.is_empty());
        assert_eq!(events, vec![TransportEvent::Opened]);
        assert!(transport.connect_deadline.is_none());

        let (mut socket, _) = listener.accept().unwrap();
        transport.close();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"CONNECT\n\n\0");
    }

    #[test]
    fn test_send_before_open_fails() {
        let mut transport = TcpTransport::new("127.0.0.1:1");
        let err = transport.send(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}

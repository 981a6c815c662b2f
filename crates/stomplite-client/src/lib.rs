//! stomplite-client - Event-driven STOMP client library.
//!
//! This crate provides a single-threaded STOMP session that runs over any
//! byte-channel transport. Raw TCP (mio) and WebSocket (tungstenite)
//! transports are included.
//!
//! # Example
//!
//! ```ignore
//! use stomplite_client::{Client, ClientConfig, Headers};
//!
//! let mut client = Client::over_tcp("localhost:61613", ClientConfig::new().host("/"));
//!
//! client.connect(
//!     "guest",
//!     "guest",
//!     |client, _connected| {
//!         client
//!             .subscribe(
//!                 "/queue/test",
//!                 |_, message| println!("{:?}", message.body_str()),
//!                 Headers::new(),
//!             )
//!             .unwrap();
//!         client.send("/queue/test", Headers::new(), "hello").unwrap();
//!     },
//!     |_, failure| eprintln!("{}", failure),
//! )?;
//!
//! client.run_until(|client| !client.is_connected())?;
//! ```
//!
//! # Acknowledgements
//!
//! Pass an `ack` header to `subscribe` and acknowledge from the callback:
//!
//! ```ignore
//! client.subscribe(
//!     "/queue/jobs",
//!     |client, message| {
//!         message.ack(client, Headers::new()).unwrap();
//!     },
//!     Headers::new().with("ack", "client-individual"),
//! )?;
//! ```

mod client;
mod config;
mod error;
mod events;
mod subscription;
mod transaction;
pub mod transport;

pub use client::{
    Client, ConnectCallback, DiagnosticCallback, ErrorCallback, MessageCallback, ReceiptCallback,
};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ConnectionState, Diagnostic, Failure};
pub use subscription::{AckMode, Message};
pub use transaction::Transaction;
pub use transport::{TcpTransport, Transport, TransportEvent, WebSocketTransport};

// Re-export useful types from core
pub use stomplite_core::{
    header, Command, ContentLength, Frame, Headers, ProtocolError, DEFAULT_MAX_FRAME_SIZE,
};

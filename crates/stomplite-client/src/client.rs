//! STOMP client session.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};

use stomplite_core::{header, Command, ContentLength, Frame, FrameDecoder, Headers};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ConnectionState, Diagnostic, Failure};
use crate::subscription::{AckMode, Message, SubscriptionRegistry};
use crate::transaction::Transaction;
use crate::transport::{TcpTransport, Transport, TransportEvent, WebSocketTransport};

const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Called once with the CONNECTED frame.
pub type ConnectCallback = Box<dyn FnOnce(&mut Client, &Frame)>;
/// Called for ERROR frames and transport failures.
pub type ErrorCallback = Box<dyn FnMut(&mut Client, &Failure)>;
/// Called for every RECEIPT frame.
pub type ReceiptCallback = Box<dyn FnMut(&mut Client, &Frame)>;
/// Called for every MESSAGE on one subscription.
pub type MessageCallback = Box<dyn FnMut(&mut Client, Message)>;
/// Called for frames the session dropped.
pub type DiagnosticCallback = Box<dyn FnMut(&Diagnostic)>;

/// A STOMP session over one transport.
///
/// The client is single-threaded and event-driven: nothing happens until
/// transport events are fed to it with `poll`, `run_until` or
/// `handle_event`. Every callback receives the client, so it can send,
/// subscribe, acknowledge or disconnect while handling a frame.
pub struct Client {
    config: ClientConfig,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    connect_headers: Headers,
    counter: u64,
    subscriptions: SubscriptionRegistry,
    transactions: HashSet<String>,
    on_connect: Option<ConnectCallback>,
    on_error: Option<ErrorCallback>,
    on_receipt: Option<ReceiptCallback>,
    on_diagnostic: Option<DiagnosticCallback>,
    events: Vec<TransportEvent>,
}

impl Client {
    /// Create a client that talks through `transport`.
    pub fn new(transport: impl Transport + 'static, config: ClientConfig) -> Self {
        let decoder = FrameDecoder::with_max_frame_size(config.max_frame_size);
        Self {
            config,
            state: ConnectionState::Disconnected,
            transport: Box::new(transport),
            decoder,
            connect_headers: Headers::new(),
            counter: 0,
            subscriptions: SubscriptionRegistry::new(),
            transactions: HashSet::new(),
            on_connect: None,
            on_error: None,
            on_receipt: None,
            on_diagnostic: None,
            events: Vec::new(),
        }
    }

    /// Create a client over raw TCP to `address` (host:port).
    pub fn over_tcp(address: impl Into<String>, config: ClientConfig) -> Self {
        Self::new(TcpTransport::new(address), config)
    }

    /// Create a client over a WebSocket at `url` (`ws://...`).
    pub fn over_websocket(url: impl Into<String>, config: ClientConfig) -> Self {
        Self::new(WebSocketTransport::new(url), config)
    }

    /// Open the transport and log in.
    ///
    /// Returns once the transport open has been requested. `on_connect` runs
    /// when the broker answers with CONNECTED. `on_error` runs for ERROR
    /// frames and if the transport fails, including before CONNECTED.
    pub fn connect<C, E>(
        &mut self,
        login: &str,
        passcode: &str,
        on_connect: C,
        on_error: E,
    ) -> Result<()>
    where
        C: FnOnce(&mut Client, &Frame) + 'static,
        E: FnMut(&mut Client, &Failure) + 'static,
    {
        let headers = Headers::new()
            .with(header::LOGIN, login)
            .with(header::PASSCODE, passcode);
        self.connect_with_headers(headers, on_connect, on_error)
    }

    /// Like `connect`, with the CONNECT headers given in full.
    pub fn connect_with_headers<C, E>(
        &mut self,
        mut headers: Headers,
        on_connect: C,
        on_error: E,
    ) -> Result<()>
    where
        C: FnOnce(&mut Client, &Frame) + 'static,
        E: FnMut(&mut Client, &Failure) + 'static,
    {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(
                "Already connected or connecting".to_string(),
            ));
        }
        check_headers(&headers)?;

        if let Some(host) = &self.config.host {
            if !headers.contains(header::HOST) {
                headers.set(header::HOST, host.as_str());
            }
        }
        if let Some(versions) = &self.config.accept_version {
            if !headers.contains(header::ACCEPT_VERSION) {
                headers.set(header::ACCEPT_VERSION, versions.as_str());
            }
        }

        self.connect_headers = headers;
        self.on_connect = Some(Box::new(on_connect));
        self.on_error = Some(Box::new(on_error));
        self.decoder.clear();
        self.state = ConnectionState::Connecting;

        debug!("Opening transport to {}", self.transport.endpoint());
        if let Err(e) = self.transport.open() {
            let reason = format!("could not connect to {}: {}", self.transport.endpoint(), e);
            info!("{}", reason);
            self.teardown();
            self.report_error(Failure::Transport(reason));
        }
        Ok(())
    }

    /// Leave the session.
    ///
    /// Sends DISCONNECT (best effort), closes the transport and forgets all
    /// subscriptions and transactions. `on_complete` runs before this returns.
    pub fn disconnect<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(&mut Client),
    {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::NotConnected);
        }

        if let Err(e) = self.transmit(Frame::new(Command::Disconnect)) {
            debug!("DISCONNECT not sent: {}", e);
        }
        self.transport.close();
        self.teardown();
        debug!("Disconnected from {}", self.transport.endpoint());

        on_complete(self);
        Ok(())
    }

    /// Send a message to `destination`.
    ///
    /// A `content-length` header is added for non-empty bodies. Add a
    /// `receipt` header to get a RECEIPT through `on_receipt`.
    pub fn send(&mut self, destination: &str, headers: Headers, body: impl Into<Bytes>) -> Result<()> {
        self.send_with(destination, headers, body, ContentLength::Auto)
    }

    /// Send a message with an explicit `content-length` policy.
    pub fn send_with(
        &mut self,
        destination: &str,
        mut headers: Headers,
        body: impl Into<Bytes>,
        content_length: ContentLength,
    ) -> Result<()> {
        self.require_connected()?;
        headers.set(header::DESTINATION, destination);
        let mut frame = Frame::with_parts(Command::Send, headers, body);
        if content_length == ContentLength::Omit {
            frame = frame.without_content_length();
        }
        self.transmit(frame)
    }

    /// Subscribe to `destination` and return the new subscription id.
    ///
    /// The `ack` header selects the acknowledgement mode (`auto` when absent).
    pub fn subscribe<F>(&mut self, destination: &str, callback: F, mut headers: Headers) -> Result<String>
    where
        F: FnMut(&mut Client, Message) + 'static,
    {
        self.require_connected()?;
        let ack_mode = match headers.get(header::ACK) {
            Some(value) => value.parse::<AckMode>()?,
            None => AckMode::Auto,
        };

        let id = self.next_id("sub");
        headers.set(header::DESTINATION, destination);
        headers.set(header::ID, id.as_str());
        self.transmit(Frame::with_parts(Command::Subscribe, headers, Bytes::new()))?;

        debug!("Subscribed {} to {} ({})", id, destination, ack_mode);
        self.subscriptions
            .insert(id.clone(), destination.to_string(), ack_mode, Box::new(callback));
        Ok(id)
    }

    /// Cancel a subscription. No further messages are delivered for `id`.
    ///
    /// Works in any state. UNSUBSCRIBE is only transmitted while connected;
    /// otherwise the broker already forgot the subscription with the session.
    pub fn unsubscribe(&mut self, id: &str, mut headers: Headers) -> Result<()> {
        if let Some(destination) = self.subscriptions.remove(id) {
            debug!("Unsubscribed {} from {}", id, destination);
        }
        if self.state != ConnectionState::Connected {
            debug!("Not connected, UNSUBSCRIBE {} not sent", id);
            return Ok(());
        }
        headers.set(header::ID, id);
        self.transmit(Frame::with_parts(Command::Unsubscribe, headers, Bytes::new()))
    }

    /// Start a transaction. A `tx-<n>` id is generated when `id` is `None`.
    pub fn begin(&mut self, id: Option<&str>, mut headers: Headers) -> Result<Transaction> {
        self.require_connected()?;
        let id = match id {
            Some(id) => id.to_string(),
            None => self.next_id("tx"),
        };
        headers.set(header::TRANSACTION, id.as_str());
        self.transmit(Frame::with_parts(Command::Begin, headers, Bytes::new()))?;
        self.transactions.insert(id.clone());
        Ok(Transaction::new(id))
    }

    pub fn commit(&mut self, transaction: &str, headers: Headers) -> Result<()> {
        self.end_transaction(Command::Commit, transaction, headers)
    }

    pub fn abort(&mut self, transaction: &str, headers: Headers) -> Result<()> {
        self.end_transaction(Command::Abort, transaction, headers)
    }

    /// Acknowledge a message by id.
    pub fn ack(&mut self, message_id: &str, subscription: &str, headers: Headers) -> Result<()> {
        self.acknowledge(Command::Ack, message_id, subscription, headers)
    }

    /// Reject a message by id.
    pub fn nack(&mut self, message_id: &str, subscription: &str, headers: Headers) -> Result<()> {
        self.acknowledge(Command::Nack, message_id, subscription, headers)
    }

    /// Set the RECEIPT handler. Replaces any previous handler.
    pub fn on_receipt<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Client, &Frame) + 'static,
    {
        self.on_receipt = Some(Box::new(callback));
    }

    /// Set a handler for frames the session drops without an error.
    pub fn on_diagnostic<F>(&mut self, callback: F)
    where
        F: FnMut(&Diagnostic) + 'static,
    {
        self.on_diagnostic = Some(Box::new(callback));
    }

    /// Wait up to `timeout` for transport activity and dispatch it.
    ///
    /// Returns true if any transport event was handled.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        // Reuse the event buffer; a callback may call poll re-entrantly.
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        let polled = self.transport.poll(timeout, &mut events);

        // Events collected before a poll error are still handled.
        let handled = !events.is_empty();
        for event in events.drain(..) {
            self.handle_event(event);
        }
        self.events = events;

        polled?;
        Ok(handled)
    }

    /// Poll until `condition` returns true.
    pub fn run_until<F>(&mut self, mut condition: F) -> Result<()>
    where
        F: FnMut(&Client) -> bool,
    {
        while !condition(self) {
            self.poll(Some(RUN_POLL_INTERVAL))?;
        }
        Ok(())
    }

    /// Handle one transport event.
    ///
    /// `poll` calls this; hosts that drive the transport themselves can feed
    /// events here directly.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Data(data) => self.on_data(&data),
            TransportEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Ids of transactions begun and not yet committed or aborted.
    pub fn open_transactions(&self) -> &HashSet<String> {
        &self.transactions
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring transport open while {:?}", self.state);
            return;
        }
        let frame = Frame::with_parts(Command::Connect, self.connect_headers.clone(), Bytes::new());
        if let Err(e) = self.transmit(frame) {
            let reason = format!("could not send CONNECT to {}: {}", self.transport.endpoint(), e);
            self.connection_lost(reason);
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Disconnected {
            debug!("Dropping {} bytes received while disconnected", data.len());
            return;
        }

        let decoded = self.decoder.push(data);

        for error in decoded.malformed {
            warn!("Dropped malformed frame: {}", error);
            self.diagnose(Diagnostic::MalformedFrame(error));
        }

        for frame in decoded.frames {
            // A callback may have ended the session mid-batch.
            if self.state == ConnectionState::Disconnected {
                debug!("Session ended, dropping {} frame", frame.command());
                continue;
            }
            self.dispatch(frame);
        }

        // Complete frames from this read go out before the overflow tears down.
        if let Some(e) = decoded.overflow {
            if self.state == ConnectionState::Disconnected {
                return;
            }
            let reason = format!("dropping connection to {}: {}", self.transport.endpoint(), e);
            warn!("{}", reason);
            self.connection_lost(reason);
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring transport close while disconnected");
            return;
        }
        let reason = match reason {
            Some(reason) => format!("lost connection to {}: {}", self.transport.endpoint(), reason),
            None => format!("lost connection to {}", self.transport.endpoint()),
        };
        info!("{}", reason);
        self.connection_lost(reason);
    }

    fn dispatch(&mut self, frame: Frame) {
        trace!("<<< {}", frame);
        match frame.command() {
            Command::Connected if self.state == ConnectionState::Connecting => {
                // State first, so on_connect can subscribe and send.
                self.state = ConnectionState::Connected;
                debug!(
                    "Connected to {} (session {:?})",
                    self.transport.endpoint(),
                    frame.get(header::SESSION)
                );
                if let Some(on_connect) = self.on_connect.take() {
                    on_connect(self, &frame);
                }
            }
            Command::Message => self.deliver(frame),
            Command::Receipt => match self.on_receipt.take() {
                Some(mut on_receipt) => {
                    on_receipt(self, &frame);
                    // Keep a handler the callback installed in the meantime.
                    if self.on_receipt.is_none() {
                        self.on_receipt = Some(on_receipt);
                    }
                }
                None => debug!("No receipt handler for {:?}", frame.get(header::RECEIPT_ID)),
            },
            Command::Error => self.report_error(Failure::Broker(frame)),
            command => {
                debug!("Ignoring unexpected {} frame", command);
                self.diagnose(Diagnostic::UnexpectedFrame(command));
            }
        }
    }

    fn deliver(&mut self, frame: Frame) {
        let Some(id) = frame.get(header::SUBSCRIPTION).map(str::to_string) else {
            debug!("Dropping MESSAGE without subscription header");
            self.diagnose(Diagnostic::UnmatchedSubscription(None));
            return;
        };

        let Some(ack_mode) = self.subscriptions.enqueue(&id, frame) else {
            debug!("Dropping MESSAGE for unknown subscription {}", id);
            self.diagnose(Diagnostic::UnmatchedSubscription(Some(id)));
            return;
        };

        // Callback already running further up the stack (it called poll);
        // that delivery drains the queue when it returns.
        let Some(mut callback) = self.subscriptions.take_callback(&id) else {
            trace!("Queued MESSAGE for busy subscription {}", id);
            return;
        };

        // Stops early if the callback unsubscribed or the session ended.
        while let Some(frame) = self.subscriptions.next_queued(&id) {
            callback(self, Message::new(frame, id.clone(), ack_mode));
        }
        self.subscriptions.restore_callback(&id, callback);
    }

    fn report_error(&mut self, failure: Failure) {
        match self.on_error.take() {
            Some(mut on_error) => {
                // Out of its slot while running so the callback can use the client.
                on_error(self, &failure);
                if self.on_error.is_none() {
                    self.on_error = Some(on_error);
                }
            }
            None => warn!("Unhandled failure: {}", failure),
        }
    }

    fn diagnose(&mut self, diagnostic: Diagnostic) {
        if let Some(on_diagnostic) = &mut self.on_diagnostic {
            on_diagnostic(&diagnostic);
        }
    }

    fn connection_lost(&mut self, reason: String) {
        self.transport.close();
        self.teardown();
        self.report_error(Failure::Transport(reason));
    }

    /// Drop all per-connection state.
    fn teardown(&mut self) {
        // The id counter survives so ids stay unique across reconnects.
        self.state = ConnectionState::Disconnected;
        self.subscriptions.clear();
        self.transactions.clear();
        self.decoder.clear();
        self.on_connect = None;
    }

    fn end_transaction(&mut self, command: Command, transaction: &str, mut headers: Headers) -> Result<()> {
        self.require_connected()?;
        headers.set(header::TRANSACTION, transaction);
        self.transmit(Frame::with_parts(command, headers, Bytes::new()))?;
        self.transactions.remove(transaction);
        Ok(())
    }

    fn acknowledge(
        &mut self,
        command: Command,
        message_id: &str,
        subscription: &str,
        mut headers: Headers,
    ) -> Result<()> {
        self.require_connected()?;
        headers.set(header::MESSAGE_ID, message_id);
        headers.set(header::SUBSCRIPTION, subscription);
        self.transmit(Frame::with_parts(command, headers, Bytes::new()))
    }

    fn require_connected(&self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, self.counter);
        self.counter += 1;
        id
    }

    fn transmit(&mut self, frame: Frame) -> Result<()> {
        check_headers(frame.headers())?;
        trace!(">>> {}", frame);
        self.transport.send(&frame.to_bytes())?;
        Ok(())
    }
}

/// Reject headers that would break the line-based frame layout.
fn check_headers(headers: &Headers) -> Result<()> {
    for (name, value) in headers.iter() {
        if name.is_empty() || name.contains([':', '\n', '\r']) {
            return Err(ClientError::InvalidHeader(format!(
                "invalid header name {:?}",
                name
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(ClientError::InvalidHeader(format!(
                "line break in value of header {:?}",
                name
            )));
        }
    }
    Ok(())
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            let _ = self.disconnect(|_| {});
        }
    }
}

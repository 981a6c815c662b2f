//! Subscription registry and delivered messages.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use stomplite_core::{header, Frame, Headers};

use crate::client::{Client, MessageCallback};
use crate::error::{ClientError, Result};

/// Acknowledgement mode requested with the SUBSCRIBE `ack` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The broker considers messages acknowledged once sent.
    #[default]
    Auto,
    /// ACK acknowledges the message and every earlier one on the subscription.
    Client,
    /// ACK acknowledges only the named message.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Whether the application is expected to ACK or NACK deliveries.
    pub fn requires_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

impl FromStr for AckMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(ClientError::InvalidHeader(format!(
                "unsupported ack mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Subscription {
    destination: String,
    ack_mode: AckMode,
    /// Empty while the callback is running.
    callback: Option<MessageCallback>,
    /// MESSAGE frames waiting for the callback.
    queued: VecDeque<Frame>,
}

/// Live subscriptions keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: String,
        destination: String,
        ack_mode: AckMode,
        callback: MessageCallback,
    ) {
        self.entries.insert(
            id,
            Subscription {
                destination,
                ack_mode,
                callback: Some(callback),
                queued: VecDeque::new(),
            },
        );
    }

    /// Remove a subscription. Returns its destination if it existed.
    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.entries.remove(id).map(|entry| entry.destination)
    }

    /// Queue a MESSAGE for `id`. Returns the ack mode, or `None` if there is
    /// no such subscription.
    pub fn enqueue(&mut self, id: &str, frame: Frame) -> Option<AckMode> {
        let entry = self.entries.get_mut(id)?;
        entry.queued.push_back(frame);
        Some(entry.ack_mode)
    }

    /// Next queued MESSAGE, while the subscription still exists.
    pub fn next_queued(&mut self, id: &str) -> Option<Frame> {
        self.entries.get_mut(id)?.queued.pop_front()
    }

    /// Take the callback out of its slot for the duration of a delivery.
    /// `None` if the subscription is gone or a delivery is already running.
    pub fn take_callback(&mut self, id: &str) -> Option<MessageCallback> {
        self.entries.get_mut(id)?.callback.take()
    }

    /// Put a callback back after a delivery, unless the subscription was
    /// removed in the meantime.
    pub fn restore_callback(&mut self, id: &str, callback: MessageCallback) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A MESSAGE frame delivered to a subscription callback.
#[derive(Debug, Clone)]
pub struct Message {
    frame: Frame,
    subscription: String,
    ack_mode: AckMode,
}

impl Message {
    pub(crate) fn new(frame: Frame, subscription: String, ack_mode: AckMode) -> Self {
        Self {
            frame,
            subscription,
            ack_mode,
        }
    }

    /// Id of the subscription this message was delivered to.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn destination(&self) -> Option<&str> {
        self.frame.get(header::DESTINATION)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.frame.get(header::MESSAGE_ID)
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn headers(&self) -> &Headers {
        self.frame.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.frame.body()
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        self.frame.body_str()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Acknowledge this message.
    ///
    /// Extra headers such as `transaction` or `receipt` are passed through.
    pub fn ack(&self, client: &mut Client, headers: Headers) -> Result<()> {
        client.ack(self.require_message_id()?, &self.subscription, headers)
    }

    /// Reject this message.
    pub fn nack(&self, client: &mut Client, headers: Headers) -> Result<()> {
        client.nack(self.require_message_id()?, &self.subscription, headers)
    }

    fn require_message_id(&self) -> Result<&str> {
        self.message_id().ok_or_else(|| {
            ClientError::InvalidHeader("MESSAGE frame has no message-id header".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use stomplite_core::Command;

    use super::*;

    fn noop() -> MessageCallback {
        Box::new(|_: &mut Client, _: Message| {})
    }

    #[test]
    fn test_ack_mode_parse() {
        assert_eq!("auto".parse::<AckMode>().unwrap(), AckMode::Auto);
        assert_eq!("client".parse::<AckMode>().unwrap(), AckMode::Client);
        assert_eq!(
            "client-individual".parse::<AckMode>().unwrap(),
            AckMode::ClientIndividual
        );
        assert!(matches!(
            "manual".parse::<AckMode>(),
            Err(ClientError::InvalidHeader(_))
        ));
        assert_eq!(AckMode::ClientIndividual.to_string(), "client-individual");
        assert!(!AckMode::default().requires_ack());
    }

    #[test]
    fn test_registry_insert_remove() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("sub-0".into(), "/queue/a".into(), AckMode::Auto, noop());
        registry.insert("sub-1".into(), "/queue/b".into(), AckMode::Client, noop());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.remove("sub-0").as_deref(), Some("/queue/a"));
        assert_eq!(registry.remove("sub-0"), None);
        assert!(registry.take_callback("sub-0").is_none());
        assert!(registry.take_callback("sub-1").is_some());

        registry.clear();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_take_and_restore_callback() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("sub-0".into(), "/queue/a".into(), AckMode::Client, noop());

        let callback = registry.take_callback("sub-0").unwrap();
        // The slot is empty while the callback is out.
        assert!(registry.take_callback("sub-0").is_none());

        registry.restore_callback("sub-0", callback);
        assert!(registry.take_callback("sub-0").is_some());
    }

    #[test]
    fn test_restore_after_remove_drops_callback() {
        let dropped = Rc::new(Cell::new(false));
        struct Guard(Rc<Cell<bool>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let guard = Guard(dropped.clone());
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            "sub-0".into(),
            "/queue/a".into(),
            AckMode::Auto,
            Box::new(move |_: &mut Client, _: Message| {
                let _held = &guard;
            }),
        );

        let callback = registry.take_callback("sub-0").unwrap();
        registry.remove("sub-0");
        registry.restore_callback("sub-0", callback);

        assert!(dropped.get());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_queue_is_per_subscription() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("sub-0".into(), "/queue/a".into(), AckMode::Client, noop());
        registry.insert("sub-1".into(), "/queue/a".into(), AckMode::Auto, noop());

        let frame = |id: &str| Frame::new(Command::Message).header("message-id", id);
        assert_eq!(registry.enqueue("sub-0", frame("1")), Some(AckMode::Client));
        assert_eq!(registry.enqueue("sub-1", frame("2")), Some(AckMode::Auto));
        assert_eq!(registry.enqueue("sub-0", frame("3")), Some(AckMode::Client));
        assert_eq!(registry.enqueue("sub-9", frame("4")), None);

        let next = |registry: &mut SubscriptionRegistry| {
            registry
                .next_queued("sub-0")
                .and_then(|f| f.get("message-id").map(str::to_string))
        };
        assert_eq!(next(&mut registry).as_deref(), Some("1"));
        assert_eq!(next(&mut registry).as_deref(), Some("3"));
        assert_eq!(next(&mut registry), None);

        registry.remove("sub-1");
        assert!(registry.next_queued("sub-1").is_none());
    }

    #[test]
    fn test_message_accessors() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/queue/a")
            .header("message-id", "m-1")
            .header("subscription", "sub-0")
            .with_body("hello");
        let message = Message::new(frame, "sub-0".into(), AckMode::Client);

        assert_eq!(message.subscription(), "sub-0");
        assert_eq!(message.destination(), Some("/queue/a"));
        assert_eq!(message.message_id(), Some("m-1"));
        assert_eq!(message.body_str(), Some("hello"));
        assert_eq!(message.ack_mode(), AckMode::Client);
        assert_eq!(message.into_frame().command(), Command::Message);
    }
}

//! In-memory transport for session tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use stomplite_core::{decode, Frame};

use super::{Transport, TransportEvent};

#[derive(Debug, Default)]
pub(crate) struct Script {
    /// Events returned by the next `poll`.
    pub events: VecDeque<TransportEvent>,
    /// Everything passed to `send`, one entry per call.
    pub sent: Vec<Vec<u8>>,
    pub opened: usize,
    pub closed: usize,
    /// Report `Opened` as soon as `open` is called.
    pub open_immediately: bool,
    /// Make `open` fail with this message.
    pub fail_open: Option<String>,
}

/// Transport driven by a shared `Script`; the test keeps a second handle.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                open_immediately: true,
                ..Default::default()
            })),
        }
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.script.borrow_mut().events.push_back(event);
    }

    pub fn push_data(&self, data: &'static [u8]) {
        self.push_event(TransportEvent::Data(Bytes::from_static(data)));
    }

    pub fn script(&self) -> std::cell::RefMut<'_, Script> {
        self.script.borrow_mut()
    }

    /// Every frame sent so far, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let joined: Vec<u8> = self.script.borrow().sent.concat();
        decode(&joined).frames
    }

    pub fn last_sent(&self) -> Option<Frame> {
        self.sent_frames().pop()
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> io::Result<()> {
        let mut script = self.script.borrow_mut();
        if let Some(message) = script.fail_open.clone() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, message));
        }
        script.opened += 1;
        if script.open_immediately {
            script.events.push_back(TransportEvent::Opened);
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.script.borrow_mut().sent.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.script.borrow_mut().closed += 1;
    }

    fn poll(
        &mut self,
        _timeout: Option<Duration>,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<()> {
        events.extend(self.script.borrow_mut().events.drain(..));
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

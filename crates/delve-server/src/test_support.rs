//! In-memory transport for exercising the registry without sockets.

use std::sync::{Arc, Mutex};

use delve_protocol::{Message, decode};

use crate::registry::{Transport, TransportClosed};

#[derive(Default)]
struct Inbox {
    frames: Vec<String>,
    closed: bool,
    failing: bool,
}

/// Records every frame sent to it. Cloning shares the same inbox, so a test
/// keeps one clone and hands the other to the registry.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inbox: Arc<Mutex<Inbox>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every send fails, as if the socket already died.
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.inbox.lock().unwrap().failing = true;
        transport
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inbox
            .lock()
            .unwrap()
            .frames
            .iter()
            .map(|f| decode(f.as_bytes()).expect("relay sent an undecodable frame"))
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.inbox.lock().unwrap().frames.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.lock().unwrap().closed
    }

    pub fn clear(&self) {
        self.inbox.lock().unwrap().frames.clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Arc<str>) -> Result<(), TransportClosed> {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.failing || inbox.closed {
            return Err(TransportClosed);
        }
        inbox.frames.push(frame.to_string());
        Ok(())
    }

    fn close(&self) {
        self.inbox.lock().unwrap().closed = true;
    }
}

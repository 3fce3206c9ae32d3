//! In-process channel pair.
//!
//! [`channel`] returns the client side ([`MemoryChannel`] plus its event
//! stream) and a [`MemoryPeer`] that plays the server: it reads the frames the
//! client sent and injects inbound frames and lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{Channel, ChannelEvent, ChannelEvents};
use crate::config::ProtocolConfig;
use crate::error::{JobwireError, Result};
use crate::protocol::RequestId;

/// Create a connected in-memory channel pair.
///
/// The event stream starts with an `Opened` event.
pub fn channel() -> (MemoryChannel, ChannelEvents, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));

    let _ = events_tx.send(ChannelEvent::Opened);

    let channel = MemoryChannel {
        outbound: outbound_tx,
        events: events_tx.clone(),
        open: open.clone(),
    };
    let peer = MemoryPeer {
        outbound: outbound_rx,
        events: events_tx,
        open,
    };
    (channel, events_rx, peer)
}

/// Client side of an in-memory channel.
#[derive(Debug)]
pub struct MemoryChannel {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

impl Channel for MemoryChannel {
    fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(JobwireError::NotConnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| JobwireError::Transport {
                message: "in-memory peer has gone away".to_string(),
                source: None,
            })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Closed(None));
        }
    }
}

/// Server side of an in-memory channel.
#[derive(Debug)]
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Wait for the next frame the client sent.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Take the next sent frame if one is already queued.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Wait for the next request and parse it as JSON.
    pub async fn next_request(&mut self) -> Option<Value> {
        let frame = self.next_frame().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Inject a raw inbound frame.
    pub fn push_frame(&self, frame: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Frame(frame.into()));
    }

    pub fn push_json(&self, value: &Value) {
        self.push_frame(value.to_string());
    }

    /// Answer a request successfully.
    pub fn respond(&self, id: RequestId, value: Value) {
        self.push_json(&json!({
            "jsonrpc": ProtocolConfig::PROTOCOL_VERSION,
            "id": id,
            "response": value,
        }));
    }

    /// Report progress for a request.
    pub fn progress(&self, id: RequestId, progress: Value) {
        self.push_json(&json!({
            "jsonrpc": ProtocolConfig::PROTOCOL_VERSION,
            "id": id,
            "progress": progress,
        }));
    }

    /// Fail a request.
    pub fn fail(&self, id: RequestId, code: i64, message: &str) {
        self.push_json(&json!({
            "jsonrpc": ProtocolConfig::PROTOCOL_VERSION,
            "id": id,
            "error": {"code": code, "message": message},
        }));
    }

    /// Report a transport error without closing.
    pub fn raise_error(&self, message: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Error(message.into()));
    }

    /// Close the channel from the server side.
    pub fn disconnect(&self, reason: Option<&str>) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(ChannelEvent::Closed(reason.map(str::to_string)));
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

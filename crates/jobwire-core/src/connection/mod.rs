//! Duplex channel abstraction used by the dispatcher.
//!
//! A [`Channel`] is the outbound half: it accepts serialized frames and
//! reports whether it can currently send. The inbound half is a stream of
//! [`ChannelEvent`]s delivered on a tokio mpsc receiver, covering the
//! open/close/error hooks and raw inbound frames.
//!
//! Two channels ship with the crate:
//!
//! - [`memory`]: an in-process pair for embedding and tests
//! - [`tcp`]: length-prefixed frames over a TCP stream

pub mod memory;
pub mod tcp;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;

pub use memory::{MemoryChannel, MemoryPeer};
pub use tcp::TcpChannel;

/// Outbound half of a duplex message channel.
pub trait Channel: Send + Sync + 'static {
    /// Queue one complete frame for delivery.
    fn send(&self, frame: String) -> Result<()>;

    /// Whether `send` is currently expected to succeed.
    fn is_open(&self) -> bool;

    /// Close the channel. Must eventually produce a `Closed` event.
    fn close(&self);
}

/// Inbound events produced by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed(Option<String>),
}

/// Receiving side of a channel's events.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Connection lifecycle events surfaced to the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Opened,
    Error { message: String },
    Closed { reason: Option<String> },
}

impl ChannelEvent {
    /// The lifecycle part of this event, if it is not a frame.
    pub fn lifecycle(&self) -> Option<ConnectionEvent> {
        match self {
            ChannelEvent::Opened => Some(ConnectionEvent::Opened),
            ChannelEvent::Error(message) => Some(ConnectionEvent::Error {
                message: message.clone(),
            }),
            ChannelEvent::Closed(reason) => Some(ConnectionEvent::Closed {
                reason: reason.clone(),
            }),
            ChannelEvent::Frame(_) => None,
        }
    }
}

/// Shared handle to the channel a dispatcher talks through.
///
/// Performs no interpretation of frame content.
#[derive(Clone)]
pub struct Connection {
    channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    pub fn new(channel: impl Channel) -> Self {
        Self {
            channel: Arc::new(channel),
        }
    }

    pub fn from_arc(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    pub fn send(&self, frame: String) -> Result<()> {
        trace!("Sending frame of {} bytes", frame.len());
        self.channel.send(frame)
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn close(&self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_mapping() {
        assert_eq!(
            ChannelEvent::Opened.lifecycle(),
            Some(ConnectionEvent::Opened)
        );
        assert_eq!(
            ChannelEvent::Error("reset".into()).lifecycle(),
            Some(ConnectionEvent::Error {
                message: "reset".into()
            })
        );
        assert_eq!(
            ChannelEvent::Closed(None).lifecycle(),
            Some(ConnectionEvent::Closed { reason: None })
        );
        assert_eq!(ChannelEvent::Frame("{}".into()).lifecycle(), None);
    }

    #[test]
    fn test_connection_delegates_to_channel() {
        let (channel, _events, mut peer) = memory::channel();
        let connection = Connection::new(channel);

        assert!(connection.is_open());
        connection.send("{}".to_string()).unwrap();
        assert_eq!(peer.try_next_frame().as_deref(), Some("{}"));

        connection.close();
        assert!(!connection.is_open());
    }
}

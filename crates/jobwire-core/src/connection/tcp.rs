//! TCP channel with length-prefixed frames.
//!
//! Wire format: 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! The stream is split into a reader task that turns frames into
//! [`ChannelEvent`]s and a writer task that drains the outbound queue, so
//! `send` never blocks the caller.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{Channel, ChannelEvent, ChannelEvents};
use crate::config::ProtocolConfig;
use crate::error::{JobwireError, Result};

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(JobwireError::transport(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(JobwireError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(JobwireError::transport)?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| JobwireError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(JobwireError::transport)?;
    writer
        .write_all(payload)
        .await
        .map_err(JobwireError::transport)?;
    writer.flush().await.map_err(JobwireError::transport)?;
    Ok(())
}

/// State shared by the channel handle and its IO tasks.
#[derive(Debug)]
struct SharedState {
    open: AtomicBool,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl SharedState {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Flip to closed and emit `Closed` exactly once.
    fn mark_closed(&self, reason: Option<String>) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.emit(ChannelEvent::Closed(reason));
        }
    }
}

/// Client side of a TCP connection.
#[derive(Debug)]
pub struct TcpChannel {
    outbound: mpsc::UnboundedSender<String>,
    state: Arc<SharedState>,
    shutdown_tx: watch::Sender<bool>,
    peer_addr: Option<SocketAddr>,
}

impl TcpChannel {
    /// Connect with the default timeout and frame limit.
    pub async fn connect(addr: SocketAddr) -> Result<(Self, ChannelEvents)> {
        Self::connect_with(
            addr,
            ProtocolConfig::CONNECT_TIMEOUT,
            ProtocolConfig::MAX_FRAME_SIZE,
        )
        .await
    }

    pub async fn connect_with(
        addr: SocketAddr,
        timeout: Duration,
        max_frame_size: usize,
    ) -> Result<(Self, ChannelEvents)> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| JobwireError::Timeout(timeout))?
            .map_err(JobwireError::transport)?;

        info!("Connected to job server at {}", addr);

        Ok(Self::from_stream(stream, max_frame_size))
    }

    /// Wrap an already connected stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream, max_frame_size: usize) -> (Self, ChannelEvents) {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(SharedState {
            open: AtomicBool::new(true),
            events: events_tx,
        });
        state.emit(ChannelEvent::Opened);

        tokio::spawn(Self::write_loop(
            writer,
            outbound_rx,
            shutdown_rx.clone(),
            state.clone(),
        ));
        tokio::spawn(Self::read_loop(
            reader,
            max_frame_size,
            shutdown_rx,
            state.clone(),
        ));

        let channel = Self {
            outbound: outbound_tx,
            state,
            shutdown_tx,
            peer_addr,
        };
        (channel, events_rx)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
        state: Arc<SharedState>,
    ) {
        loop {
            let frame = tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = shutdown_rx.changed() => break,
            };

            if let Err(e) = write_frame(&mut writer, frame.as_bytes()).await {
                warn!("TCP write failed: {}", e);
                state.emit(ChannelEvent::Error(e.to_string()));
                state.mark_closed(Some(e.to_string()));
                break;
            }
        }

        let _ = writer.shutdown().await;
        debug!("TCP writer stopped");
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        max_frame_size: usize,
        mut shutdown_rx: watch::Receiver<bool>,
        state: Arc<SharedState>,
    ) {
        loop {
            let result = tokio::select! {
                result = read_frame(&mut reader, max_frame_size) => result,
                _ = shutdown_rx.changed() => break,
            };

            match result {
                Ok(Some(bytes)) => match String::from_utf8(bytes) {
                    Ok(frame) => state.emit(ChannelEvent::Frame(frame)),
                    Err(_) => warn!("Dropping TCP frame with invalid UTF-8"),
                },
                Ok(None) => {
                    state.mark_closed(Some("peer closed the connection".to_string()));
                    break;
                }
                Err(e) => {
                    // After a bad length prefix the stream cannot be resynchronized.
                    warn!("TCP read failed: {}", e);
                    state.emit(ChannelEvent::Error(e.to_string()));
                    state.mark_closed(Some(e.to_string()));
                    break;
                }
            }
        }
        debug!("TCP reader stopped");
    }
}

impl Channel for TcpChannel {
    fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(JobwireError::NotConnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| JobwireError::Transport {
                message: "TCP writer has stopped".to_string(),
                source: None,
            })
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.state.mark_closed(None);
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

//! Multiplexing job client.
//!
//! A [`Dispatcher`] owns one connection and any number of outstanding jobs.
//! All job bookkeeping lives on a single worker task; the public methods only
//! enqueue commands, so they are safe to call from any task and from inside
//! progress callbacks.
//!
//! # Connection loss
//!
//! Closing the connection does not complete outstanding jobs. Their handles
//! stay pending until the server answers (it cannot, once closed) or every
//! `Dispatcher` clone is dropped, at which point they resolve with
//! [`JobwireError::Abandoned`]. Set
//! [`DispatcherConfig::fail_outstanding_on_close`] to fail them with
//! [`JobwireError::ConnectionClosed`] as soon as the channel reports `Closed`.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobwire::{CallOptions, Dispatcher, TcpChannel};
//! use serde_json::json;
//!
//! let (channel, events) = TcpChannel::connect("127.0.0.1:9000".parse()?).await?;
//! let dispatcher = Dispatcher::spawn(channel, events);
//!
//! let sum = dispatcher.call("add", json!([2, 3]))?.await?;
//!
//! let job = dispatcher.call_with(
//!     "longTask",
//!     json!({}),
//!     CallOptions::new().on_progress(|p| println!("{:?}/{:?}", p.worked, p.total)),
//! )?;
//! job.cancel();
//! ```

mod handle;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::config::{DispatcherConfig, ProtocolConfig};
use crate::connection::{Channel, ChannelEvents, Connection, ConnectionEvent};
use crate::error::{JobwireError, Result};
use crate::operation::{JobStatus, Operation, ProgressCallback, ResponseTransform};
use crate::protocol::{MessageCodec, Params, Progress, RequestEnvelope, RequestId};

pub use handle::CallHandle;
use worker::{Command, DispatchWorker};

/// Optional per-call hooks.
#[derive(Default)]
pub struct CallOptions {
    on_progress: Option<ProgressCallback>,
    transform: Option<ResponseTransform>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `callback` for every progress notification of the job.
    pub fn on_progress(mut self, callback: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Map the successful result before it is handed to the caller.
    pub fn transform(mut self, transform: impl FnOnce(Value) -> Value + Send + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }
}

/// Monotonic request id source shared by the handle and the worker.
#[derive(Debug)]
struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    fn new(offset: u64) -> Self {
        Self {
            next: AtomicU64::new(offset),
        }
    }

    /// Next id, or `None` once the id space is used up. Never wraps.
    fn next(&self) -> Option<RequestId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
    }
}

#[derive(Debug)]
struct Inner {
    connection: Connection,
    commands: mpsc::UnboundedSender<Command>,
    ids: Arc<IdAllocator>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
    config: DispatcherConfig,
}

/// Client for one duplex connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Start a dispatcher with the default configuration.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(channel: impl Channel, events: ChannelEvents) -> Self {
        DispatcherBuilder::new().spawn(channel, events)
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Call `method` without progress callback or transform.
    pub fn call(&self, method: impl Into<String>, params: impl Into<Params>) -> Result<CallHandle> {
        self.call_with(method, params, CallOptions::default())
    }

    /// Call `method` on the server.
    ///
    /// Fails immediately with [`JobwireError::NotConnected`] when the
    /// connection is not open, or [`JobwireError::IdsExhausted`] once every
    /// request id has been handed out; nothing is registered in either case.
    /// Errors found later (a failed write, a server failure) arrive through
    /// the returned handle.
    pub fn call_with(
        &self,
        method: impl Into<String>,
        params: impl Into<Params>,
        options: CallOptions,
    ) -> Result<CallHandle> {
        if !self.inner.connection.is_open() {
            return Err(JobwireError::NotConnected);
        }

        let id = self.inner.ids.next().ok_or(JobwireError::IdsExhausted)?;
        let request = RequestEnvelope::new(id, method, params);
        let (operation, status, completion) =
            Operation::new(request, options.on_progress, options.transform);

        self.inner
            .commands
            .send(Command::Submit(operation))
            .map_err(|_| JobwireError::DispatcherStopped)?;

        Ok(CallHandle::new(
            id,
            status,
            completion,
            self.inner.commands.downgrade(),
        ))
    }

    /// Ask the server to cancel job `id`.
    ///
    /// Unknown or already finished ids are ignored with a warning. The job
    /// only ends `CANCELLED` if the server acknowledges; it may still finish
    /// normally.
    pub fn cancel(&self, id: RequestId) {
        if self.inner.commands.send(Command::Cancel { id }).is_err() {
            warn!("Dispatcher stopped; cannot cancel job {}", id);
        }
    }

    /// Close the underlying connection. Outstanding jobs are not completed.
    pub fn close(&self) {
        self.inner.connection.close();
    }

    pub fn is_open(&self) -> bool {
        self.inner.connection.is_open()
    }

    /// Receive connection lifecycle events (opened, error, closed).
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Ids and statuses of the jobs still awaiting a terminal message.
    pub async fn outstanding(&self) -> Result<Vec<(RequestId, JobStatus)>> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Snapshot { reply })
            .map_err(|_| JobwireError::DispatcherStopped)?;
        rx.await.map_err(|_| JobwireError::DispatcherStopped)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }
}

/// Builder for configuring a [`Dispatcher`].
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = Dispatcher::builder()
///     .id_offset(100)
///     .fail_outstanding_on_close(true)
///     .spawn(channel, events);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// First request id to hand out.
    ///
    /// Default: `0`
    pub fn id_offset(mut self, offset: u64) -> Self {
        self.config.id_offset = offset;
        self
    }

    /// Fail outstanding jobs when the connection closes.
    ///
    /// Default: `false`
    pub fn fail_outstanding_on_close(mut self, enable: bool) -> Self {
        self.config.fail_outstanding_on_close = enable;
        self
    }

    /// Reserved method used for cancellation requests.
    ///
    /// Default: `__cancel__`
    pub fn cancel_method(mut self, method: impl Into<String>) -> Self {
        self.config.cancel_method = method.into();
        self
    }

    /// Start the worker task and return the dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self, channel: impl Channel, events: ChannelEvents) -> Dispatcher {
        self.spawn_connection(Connection::new(channel), events)
    }

    /// Like [`spawn`](Self::spawn) for a channel already shared elsewhere.
    pub fn spawn_shared(self, channel: Arc<dyn Channel>, events: ChannelEvents) -> Dispatcher {
        self.spawn_connection(Connection::from_arc(channel), events)
    }

    fn spawn_connection(self, connection: Connection, events: ChannelEvents) -> Dispatcher {
        let config = self.config;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(ProtocolConfig::LIFECYCLE_CAPACITY);
        let ids = Arc::new(IdAllocator::new(config.id_offset));

        let worker = DispatchWorker::new(
            connection.clone(),
            MessageCodec::new(config.protocol_version.clone())
                .with_sentinel_policy(config.sentinels),
            ids.clone(),
            lifecycle.clone(),
            config.clone(),
        );
        tokio::spawn(worker.run(commands_rx, events));

        Dispatcher {
            inner: Arc::new(Inner {
                connection,
                commands: commands_tx,
                ids,
                lifecycle,
                config,
            }),
        }
    }
}

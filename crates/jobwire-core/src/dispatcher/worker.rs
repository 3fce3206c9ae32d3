//! The task that owns every outstanding job.
//!
//! Commands from [`Dispatcher`](super::Dispatcher) handles and events from the
//! channel are processed one at a time, so the correlation table needs no
//! locking and callbacks run in the order frames arrived.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::IdAllocator;
use crate::config::DispatcherConfig;
use crate::connection::{ChannelEvent, ChannelEvents, Connection, ConnectionEvent};
use crate::operation::{Completion, JobStatus, Operation};
use crate::protocol::{MessageCodec, RequestEnvelope, RequestId, ResponseEnvelope};
use crate::table::CorrelationTable;

/// Requests sent to the worker.
#[derive(Debug)]
pub(crate) enum Command {
    Submit(Operation),
    Cancel { id: RequestId },
    Snapshot {
        reply: oneshot::Sender<Vec<(RequestId, JobStatus)>>,
    },
}

pub(crate) struct DispatchWorker {
    connection: Connection,
    codec: MessageCodec,
    table: CorrelationTable,
    ids: Arc<IdAllocator>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
    config: DispatcherConfig,
}

impl DispatchWorker {
    pub(crate) fn new(
        connection: Connection,
        codec: MessageCodec,
        ids: Arc<IdAllocator>,
        lifecycle: broadcast::Sender<ConnectionEvent>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            connection,
            codec,
            table: CorrelationTable::new(),
            ids,
            lifecycle,
            config,
        }
    }

    /// Run until every `Dispatcher` clone is dropped.
    ///
    /// Jobs still registered at that point are dropped with the table, which
    /// resolves their handles as abandoned.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: ChannelEvents,
    ) {
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("Channel event stream ended");
                        events_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        if !self.table.is_empty() {
            debug!(
                "Dispatcher stopping with {} outstanding jobs",
                self.table.len()
            );
        }
        debug!("Dispatcher worker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(operation) => self.submit(operation),
            Command::Cancel { id } => self.cancel(id),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.table.snapshot());
            }
        }
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        match &event {
            ChannelEvent::Frame(frame) => {
                self.handle_frame(frame);
                return;
            }
            ChannelEvent::Opened => info!("Connection opened"),
            ChannelEvent::Error(message) => warn!("Connection error: {}", message),
            ChannelEvent::Closed(reason) => info!(
                "Connection closed: {}",
                reason.as_deref().unwrap_or("closed locally")
            ),
        }

        if let Some(lifecycle) = event.lifecycle() {
            // No subscribers is fine.
            let _ = self.lifecycle.send(lifecycle);
        }

        if matches!(event, ChannelEvent::Closed(_)) && self.config.fail_outstanding_on_close {
            self.fail_outstanding();
        }
    }

    /// Register, encode and send a job.
    fn submit(&mut self, operation: Operation) {
        let id = operation.id();
        let frame = match self.codec.encode(operation.request()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode job {}: {}", id, e);
                operation.notify_send_failed(e);
                return;
            }
        };

        if let Err(e) = self.table.register(operation) {
            error!("Refusing job: {}", e);
            return;
        }

        match self.connection.send(frame) {
            Ok(()) => {
                if let Some(operation) = self.table.lookup_mut(id) {
                    operation.mark_submitted();
                    debug!("Submitted job {} ({})", id, operation.request().method);
                }
            }
            Err(e) => {
                warn!("Failed to send job {}: {}", id, e);
                if let Some(operation) = self.table.remove(id) {
                    operation.notify_send_failed(e);
                }
            }
        }
    }

    /// Send a cancellation request for `target` through the normal call path.
    fn cancel(&mut self, target: RequestId) {
        if !self.table.contains(target) {
            warn!("Ignoring cancel for unknown or finished job {}", target);
            return;
        }

        let Some(id) = self.ids.next() else {
            warn!("Request ids exhausted; cannot cancel job {}", target);
            return;
        };
        let request = RequestEnvelope::new(
            id,
            self.config.cancel_method.clone(),
            json!({ "id": target }),
        );
        let (operation, _status, completion) = Operation::new(request, None, None);

        info!("Requesting cancellation of job {} (request {})", target, id);
        self.submit(operation);
        tokio::spawn(log_cancel_outcome(target, completion));
    }

    fn handle_frame(&mut self, frame: &str) {
        let envelope = match self.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        let id = envelope.id();
        let kind = envelope.kind();
        match envelope {
            ResponseEnvelope::Progress { progress, .. } => match self.table.lookup_mut(id) {
                Some(operation) => operation.notify_progress(&progress),
                None => warn_unknown(id, kind),
            },
            ResponseEnvelope::Result { value, .. } => match self.table.remove(id) {
                Some(operation) => {
                    debug!("Job {} done", id);
                    operation.notify_done(value);
                }
                None => warn_unknown(id, kind),
            },
            ResponseEnvelope::Failure { failure, .. } => match self.table.remove(id) {
                Some(operation) => {
                    debug!("Job {} failed: {}", id, failure);
                    operation.notify_failed(failure, self.config.cancelled_code);
                }
                None => warn_unknown(id, kind),
            },
        }
    }

    fn fail_outstanding(&mut self) {
        let operations = self.table.drain();
        if operations.is_empty() {
            return;
        }
        warn!(
            "Failing {} outstanding jobs after connection closed",
            operations.len()
        );
        for operation in operations {
            operation.notify_connection_lost();
        }
    }
}

fn warn_unknown(id: RequestId, kind: &str) {
    warn!("Dropping {} frame for unknown or finished job {}", kind, id);
}

async fn log_cancel_outcome(target: RequestId, completion: Completion) {
    match completion.await {
        Ok(Ok(_)) => debug!("Server accepted cancellation of job {}", target),
        Ok(Err(e)) => warn!("Cancellation of job {} was rejected: {}", target, e),
        Err(_) => debug!("Cancellation request for job {} was abandoned", target),
    }
}

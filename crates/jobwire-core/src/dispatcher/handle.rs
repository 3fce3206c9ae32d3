use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use super::worker::Command;
use crate::error::{JobwireError, Result};
use crate::operation::{Completion, JobStatus};
use crate::protocol::RequestId;

/// Caller's side of one job.
///
/// Await it for the result. The handle does not keep the dispatcher alive:
/// once every `Dispatcher` clone is dropped it resolves with
/// [`JobwireError::Abandoned`].
pub struct CallHandle {
    id: RequestId,
    status: watch::Receiver<JobStatus>,
    completion: Completion,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl CallHandle {
    pub(crate) fn new(
        id: RequestId,
        status: watch::Receiver<JobStatus>,
        completion: Completion,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            status,
            completion,
            commands,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Watch status transitions, e.g. `wait_for(|s| s.is_terminal())`.
    pub fn status_watch(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Ask the server to cancel this job. Same as `Dispatcher::cancel(id)`.
    pub fn cancel(&self) {
        let sent = self
            .commands
            .upgrade()
            .is_some_and(|commands| commands.send(Command::Cancel { id: self.id }).is_ok());
        if !sent {
            warn!("Dispatcher stopped; cannot cancel job {}", self.id);
        }
    }
}

impl Future for CallHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.completion)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(JobwireError::Abandoned { id })))
    }
}

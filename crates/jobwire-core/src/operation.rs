//! Client-side lifecycle of one outstanding remote call.
//!
//! ```text
//! NEW --submit--> SUBMITTED --progress--> IN_PROGRESS --terminal--> DONE | FAILED | CANCELLED
//!                 SUBMITTED --terminal------------------------------> DONE | FAILED | CANCELLED
//! ```
//!
//! Terminal transitions consume the [`Operation`], so the completion can only
//! ever fire once.
//!
//! Caller callbacks run on the dispatcher's worker task. A panic inside one is
//! caught here and confined to its own job.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use crate::error::{JobwireError, Result};
use crate::protocol::{Progress, RequestEnvelope, RequestId, RpcFailure};

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Submitted,
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::New => "NEW",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Called for every progress notification of a job, in arrival order.
pub type ProgressCallback = Box<dyn FnMut(&Progress) + Send>;

/// Applied to a successful result before it reaches the caller.
pub type ResponseTransform = Box<dyn FnOnce(Value) -> Value + Send>;

/// Receiving side of a job's completion.
pub type Completion = oneshot::Receiver<Result<Value>>;

/// One outstanding remote call, owned by the dispatcher until terminal.
pub struct Operation {
    request: RequestEnvelope,
    status: watch::Sender<JobStatus>,
    on_progress: Option<ProgressCallback>,
    transform: Option<ResponseTransform>,
    completion: oneshot::Sender<Result<Value>>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.request.id)
            .field("method", &self.request.method)
            .field("status", &self.status())
            .finish()
    }
}

impl Operation {
    /// Create an operation in `NEW`.
    ///
    /// Returns the operation together with the status watch and completion
    /// receiver that make up the caller's side.
    pub fn new(
        request: RequestEnvelope,
        on_progress: Option<ProgressCallback>,
        transform: Option<ResponseTransform>,
    ) -> (Self, watch::Receiver<JobStatus>, Completion) {
        let (status, status_rx) = watch::channel(JobStatus::New);
        let (completion, completion_rx) = oneshot::channel();
        let operation = Self {
            request,
            status,
            on_progress,
            transform,
            completion,
        };
        (operation, status_rx, completion_rx)
    }

    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn request(&self) -> &RequestEnvelope {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Record that the request reached the wire.
    pub fn mark_submitted(&mut self) {
        match self.status() {
            JobStatus::New => {
                self.status.send_replace(JobStatus::Submitted);
            }
            other => {
                debug!("Job {} already {} when marked submitted", self.id(), other);
            }
        }
    }

    /// Deliver a non-terminal progress notification.
    ///
    /// A callback that panics is logged and detached; the job keeps running.
    pub fn notify_progress(&mut self, progress: &Progress) {
        self.status.send_if_modified(|status| {
            if *status == JobStatus::InProgress {
                false
            } else {
                *status = JobStatus::InProgress;
                true
            }
        });

        let Some(callback) = self.on_progress.as_mut() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(progress))) {
            error!(
                "Progress callback for job {} panicked: {}",
                self.request.id,
                panic_message(payload.as_ref())
            );
            self.on_progress = None;
        }
    }

    /// Resolve the job with a successful result.
    ///
    /// A transform that panics rejects the job with [`JobwireError::Callback`].
    pub fn notify_done(self, value: Value) {
        let Self {
            request,
            status,
            transform,
            completion,
            ..
        } = self;

        let id = request.id;
        let value = match transform {
            Some(transform) => catch_unwind(AssertUnwindSafe(|| transform(value))),
            None => Ok(value),
        };
        match value {
            Ok(value) => {
                status.send_replace(JobStatus::Done);
                deliver(id, completion, Ok(value));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Result transform for job {} panicked: {}", id, message);
                status.send_replace(JobStatus::Failed);
                deliver(id, completion, Err(JobwireError::Callback { id, message }));
            }
        }
    }

    /// Reject the job with a server failure.
    ///
    /// A failure carrying `cancelled_code` is the server's cancellation
    /// acknowledgment and ends the job in `CANCELLED`.
    pub fn notify_failed(self, failure: RpcFailure, cancelled_code: i64) {
        let id = self.id();
        let (status, error) = if failure.code == cancelled_code {
            (JobStatus::Cancelled, JobwireError::Cancelled { id, failure })
        } else {
            (JobStatus::Failed, JobwireError::Remote { id, failure })
        };
        self.status.send_replace(status);
        deliver(id, self.completion, Err(error));
    }

    /// Reject the job locally after its connection went away.
    pub fn notify_connection_lost(self) {
        let id = self.id();
        self.status.send_replace(JobStatus::Failed);
        deliver(id, self.completion, Err(JobwireError::ConnectionClosed { id }));
    }

    /// Reject the job because its request never reached the wire.
    pub fn notify_send_failed(self, error: JobwireError) {
        let id = self.id();
        self.status.send_replace(JobStatus::Failed);
        deliver(id, self.completion, Err(error));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn deliver(id: RequestId, completion: oneshot::Sender<Result<Value>>, outcome: Result<Value>) {
    if completion.send(outcome).is_err() {
        // The caller dropped its handle; nothing is waiting.
        debug!("Job {} completed after its handle was dropped", id);
    }
}

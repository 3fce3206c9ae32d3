//! Registry of outstanding jobs keyed by request id.
//!
//! Not synchronized: the table is owned by the dispatcher worker and never
//! shared across tasks.

use std::collections::HashMap;

use crate::error::{JobwireError, Result};
use crate::operation::{JobStatus, Operation};
use crate::protocol::RequestId;

#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<RequestId, Operation>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under its request id.
    ///
    /// Ids are issued monotonically, so a duplicate means the dispatcher's
    /// bookkeeping is broken.
    pub fn register(&mut self, operation: Operation) -> Result<()> {
        let id = operation.id();
        if self.entries.contains_key(&id) {
            debug_assert!(false, "request id {} registered twice", id);
            return Err(JobwireError::DuplicateRequestId { id });
        }
        self.entries.insert(id, operation);
        Ok(())
    }

    pub fn lookup(&self, id: RequestId) -> Option<&Operation> {
        self.entries.get(&id)
    }

    pub fn lookup_mut(&mut self, id: RequestId) -> Option<&mut Operation> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<Operation> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids and statuses of every outstanding job, sorted by id.
    pub fn snapshot(&self) -> Vec<(RequestId, JobStatus)> {
        let mut jobs: Vec<_> = self
            .entries
            .iter()
            .map(|(id, op)| (*id, op.status()))
            .collect();
        jobs.sort_unstable_by_key(|(id, _)| *id);
        jobs
    }

    /// Remove and return every outstanding job, sorted by id.
    pub fn drain(&mut self) -> Vec<Operation> {
        let mut operations: Vec<_> = self.entries.drain().map(|(_, op)| op).collect();
        operations.sort_unstable_by_key(Operation::id);
        operations
    }
}

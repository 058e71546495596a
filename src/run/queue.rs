// src/run/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::errors::SchedulerError;
use crate::run::request::RunRequest;

/// FIFO of run requests waiting for the scheduler to become idle.
///
/// The queue applies no concurrency limit of its own; single-flight is the
/// scheduler's job. It only guarantees that requests come out in the order
/// they were accepted, and that nothing is accepted that could never run.
#[derive(Debug, Default)]
pub struct RunRequestQueue {
    pending: VecDeque<RunRequest>,
}

impl RunRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Accept `request`, or fail with `InvalidRequest` if it has no targets.
    pub fn enqueue(&mut self, request: RunRequest) -> Result<(), SchedulerError> {
        request.validate()?;
        debug!(
            targets = ?request.target_ids(),
            mode = %request.mode,
            position = self.pending.len(),
            "queued run request"
        );
        self.pending.push_back(request);
        Ok(())
    }

    /// Remove and return the oldest pending request.
    pub fn dequeue_next(&mut self) -> Option<RunRequest> {
        self.pending.pop_front()
    }

    /// Remove every pending request, oldest first.
    pub fn drain_pending(&mut self) -> Vec<RunRequest> {
        let drained: Vec<RunRequest> = self.pending.drain(..).collect();
        debug!(drained = drained.len(), "drained pending run requests");
        drained
    }
}

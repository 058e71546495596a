// src/run/sink.rs

//! Outbound result stream.
//!
//! The scheduler forwards every update it receives from the backend to a
//! [`TestResultSink`], in the order the backend produced them. The
//! production sink is [`ResultStore`], which keeps the latest update per
//! test item for reporting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::run::request::TestItemId;
use crate::run::session::{RunSession, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Running,
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One per-test result update, keyed by test item id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUpdate {
    pub item: TestItemId,
    pub status: TestStatus,
    pub message: Option<String>,
}

impl ResultUpdate {
    pub fn new(item: impl Into<TestItemId>, status: TestStatus) -> Self {
        Self {
            item: item.into(),
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receiver of result updates. Implementations must not block.
pub trait TestResultSink: Send + Sync {
    fn session_started(&self, _session: &RunSession) {}

    fn update(&self, session: SessionId, update: ResultUpdate);

    fn session_ended(&self, _session: &RunSession) {}
}

/// In-memory sink holding the latest update per test item.
#[derive(Debug, Default)]
pub struct ResultStore {
    latest: Mutex<BTreeMap<TestItemId, ResultUpdate>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All known results, ordered by test item id.
    pub fn snapshot(&self) -> Vec<ResultUpdate> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Results for the given ids; unknown ids are skipped.
    pub fn results_for(&self, ids: &[TestItemId]) -> Vec<ResultUpdate> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        ids.iter().filter_map(|id| latest.get(id).cloned()).collect()
    }

    pub fn status_of(&self, id: &str) -> Option<TestStatus> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|u| u.status)
    }
}

impl TestResultSink for ResultStore {
    fn session_started(&self, session: &RunSession) {
        info!(
            session = session.id,
            mode = %session.request.mode,
            targets = ?session.request.target_ids(),
            "test session started"
        );
    }

    fn update(&self, session: SessionId, update: ResultUpdate) {
        debug!(session, item = %update.item, status = %update.status, "test result");
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(update.item.clone(), update);
    }

    fn session_ended(&self, session: &RunSession) {
        info!(session = session.id, state = %session.state, "test session ended");
    }
}

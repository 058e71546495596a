// src/run/session.rs

use std::fmt;
use std::time::SystemTime;

use crate::run::request::RunRequest;

/// Monotonically increasing session identifier.
pub type SessionId = u64;

/// Lifecycle of a session: `Pending -> Starting -> Running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a session was brought down, when it did not end on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// User cancellation; the scheduler stays ready for more work.
    Cancelled,
    /// Process shutdown; held OS resources were released.
    Shutdown,
}

/// One execution of a run request, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub id: SessionId,
    pub request: RunRequest,
    pub state: SessionState,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    /// Set when the session was torn down rather than ending on its own.
    pub teardown: Option<Teardown>,
    /// `false` when teardown timed out and resource cleanup is unconfirmed.
    pub cleanup_confirmed: bool,
}

impl RunSession {
    pub fn new(id: SessionId, request: RunRequest) -> Self {
        Self {
            id,
            request,
            state: SessionState::Pending,
            started_at: None,
            ended_at: None,
            teardown: None,
            cleanup_confirmed: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a non-terminal state. Terminal sessions are never revived.
    pub(crate) fn advance(&mut self, state: SessionState) {
        if self.is_terminal() {
            return;
        }
        if state == SessionState::Starting && self.started_at.is_none() {
            self.started_at = Some(SystemTime::now());
        }
        self.state = state;
    }

    pub(crate) fn finish(&mut self, state: SessionState) {
        debug_assert!(state.is_terminal());
        if self.is_terminal() {
            return;
        }
        self.state = state;
        self.ended_at = Some(SystemTime::now());
    }
}

// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The scheduler never touches processes directly. It asks an
//! [`ExecutionBackend`] to launch a session and gets back a stream of
//! [`BackendEvent`]s plus a [`SessionControl`] to wait for, terminate and
//! clean up the out-of-process runner.
//!
//! Production code uses [`ProcessBackend`](super::ProcessBackend); tests
//! provide scripted backends that never spawn anything.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::run::{ResultUpdate, RunRequest, SessionId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something the backend reported while a session was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Result(ResultUpdate),
    /// The runner declared the run finished; a non-zero exit afterwards
    /// means "some tests failed", not "the runner crashed".
    Finished,
}

/// How the backend process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendExit {
    Success,
    Code(i32),
    /// Ended without an exit code (signal, lost child, ...).
    Abnormal(String),
}

impl BackendExit {
    pub fn is_success(&self) -> bool {
        matches!(self, BackendExit::Success)
    }
}

impl fmt::Display for BackendExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendExit::Success => f.write_str("exited successfully"),
            BackendExit::Code(code) => write!(f, "exited with status {code}"),
            BackendExit::Abnormal(reason) => write!(f, "terminated abnormally: {reason}"),
        }
    }
}

/// Control surface over one launched session.
pub trait SessionControl: Send {
    /// Wait for the backend to exit on its own. Must be cancel-safe.
    fn wait(&mut self) -> BoxFuture<'_, BackendExit>;

    /// Ask the backend (and any attached debugger) to stop, and resolve once
    /// the teardown has been acknowledged.
    fn terminate(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Release OS resources held for the session (temp files, sockets).
    fn release(&mut self) -> Result<()>;
}

pub struct LaunchedSession {
    pub events: mpsc::Receiver<BackendEvent>,
    pub control: Box<dyn SessionControl>,
}

impl fmt::Debug for LaunchedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedSession").finish_non_exhaustive()
    }
}

/// Trait abstracting how a run request turns into a running backend.
pub trait ExecutionBackend: Send + Sync {
    /// Start the backend for `request`. An error here means the backend
    /// could not be started at all.
    fn launch<'a>(
        &'a self,
        session: SessionId,
        request: &'a RunRequest,
    ) -> BoxFuture<'a, Result<LaunchedSession>>;
}

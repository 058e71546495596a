// src/engine/mod.rs

//! Orchestration engine for testrelay.
//!
//! One runtime loop owns the run queue and reacts to:
//! - analysis service notifications (classpath updates, mode changes,
//!   project imports)
//! - user commands (run/debug, relaunch, cancel, open report)
//! - file changes reported by the registered listeners
//! - session completions
//! - shutdown signals
//!
//! The pure notification routing lives in [`core`]; the async loop is
//! implemented in [`runtime`].

use std::fmt;
use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::errors::SchedulerError;
use crate::run::{SessionId, SessionReport, TestItem, TestItemId};
use crate::types::{BusyBehaviour, RunMode, ServerMode};

/// Notification pushed by the analysis service through a wired capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceNotification {
    ClasspathUpdated,
    ServerModeChanged(ServerMode),
    ProjectsImported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

/// Command from the UI/command surface.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Run {
        targets: Vec<TestItem>,
        mode: RunMode,
        /// Name of a `[launch.<name>]` configuration.
        launch: Option<String>,
    },
    Relaunch,
    Cancel,
    /// Report for the given items; empty means every known result.
    OpenReport { items: Vec<TestItemId> },
}

/// What became of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Started(SessionId),
    Queued { position: usize },
    Cancelled {
        session: Option<SessionId>,
        superseded: usize,
    },
    ReportOpened { results: usize },
    Rejected(SchedulerError),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Started(id) => write!(f, "ok started session {id}"),
            CommandOutcome::Queued { position } => write!(f, "ok queued at position {position}"),
            CommandOutcome::Cancelled {
                session: Some(id),
                superseded,
            } => write!(f, "ok cancelled session {id} ({superseded} queued superseded)"),
            CommandOutcome::Cancelled {
                session: None,
                superseded,
            } => write!(f, "ok nothing running ({superseded} queued superseded)"),
            CommandOutcome::ReportOpened { results } => write!(f, "ok report with {results} results"),
            CommandOutcome::Rejected(err) => write!(f, "error {err}"),
        }
    }
}

/// Events flowing into the runtime.
#[derive(Debug)]
pub enum RuntimeEvent {
    Service(ServiceNotification),
    Command {
        command: UserCommand,
        reply: Option<oneshot::Sender<CommandOutcome>>,
    },
    FileChanged {
        path: PathBuf,
        kind: FileChangeKind,
    },
    SessionEnded(SessionReport),
    /// Graceful shutdown requested (Ctrl-C, `quit`, stdin closed).
    ShutdownRequested,
}

impl RuntimeEvent {
    pub fn command(command: UserCommand) -> Self {
        RuntimeEvent::Command {
            command,
            reply: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub busy_behaviour: BusyBehaviour,
    /// Exit once nothing is running or queued (used for `--once`).
    pub exit_when_idle: bool,
    /// Register file listeners at startup.
    pub watch: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            busy_behaviour: BusyBehaviour::default(),
            exit_when_idle: false,
            watch: true,
        }
    }
}

pub mod core;
pub mod runtime;

pub use core::{NotificationStep, route_notification};
pub use runtime::{Runtime, RuntimeComponents};

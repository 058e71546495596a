// src/errors.rs

//! Crate-wide error types.
//!
//! [`SchedulerError`] is the taxonomy callers of the run scheduler see.
//! Structural errors describe caller misuse and are resolved synchronously;
//! runtime errors describe an unexpected environment condition and are
//! logged where they happen as well as returned.

use thiserror::Error;

use crate::run::SessionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("a test session is already active (session {active})")]
    Busy { active: SessionId },

    #[error("nothing to relaunch: no session has completed yet")]
    NoPriorRequest,

    #[error("failed to launch test backend: {cause}")]
    LaunchFailed { cause: String },

    #[error("test backend crashed during session {session}: {exit}")]
    BackendCrashed { session: SessionId, exit: String },

    #[error("teardown of session {session} was not confirmed in time")]
    CancelTimeout { session: SessionId },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    /// `true` for errors caused by the environment rather than by the caller.
    pub fn is_runtime_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::LaunchFailed { .. }
                | SchedulerError::BackendCrashed { .. }
                | SchedulerError::CancelTimeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum TestRelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TestRelayError>;

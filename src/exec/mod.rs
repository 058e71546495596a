// src/exec/mod.rs

//! Test execution layer.
//!
//! - [`backend`] defines the `ExecutionBackend` trait the scheduler talks to.
//! - [`process`] is the production backend: it spawns the configured runner
//!   with `tokio::process::Command`, optionally under a debugger.
//! - [`output`] turns runner stdout into result events.

pub mod backend;
pub mod output;
pub mod process;

pub use backend::{
    BackendEvent, BackendExit, BoxFuture, ExecutionBackend, LaunchedSession, SessionControl,
};
pub use output::ResultLineParser;
pub use process::{LaunchPlan, ProcessBackend};

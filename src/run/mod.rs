// src/run/mod.rs

//! Run/debug requests and their execution.
//!
//! - [`request`]: test items, launch configurations, run requests.
//! - [`queue`]: FIFO of requests waiting for the scheduler.
//! - [`session`]: the per-execution state machine.
//! - [`sink`]: where result updates go.
//! - [`scheduler`]: the single-flight orchestrator tying it together.

pub mod queue;
pub mod request;
pub mod scheduler;
pub mod session;
pub mod sink;

pub use queue::RunRequestQueue;
pub use request::{LaunchConfiguration, RunRequest, SourceRange, TestItem, TestItemId, TestKind};
pub use scheduler::{
    RunnerScheduler, SchedulerOptions, SchedulerStatus, SessionHandle, SessionReport,
};
pub use session::{RunSession, SessionId, SessionState, Teardown};
pub use sink::{ResultStore, ResultUpdate, TestResultSink, TestStatus};

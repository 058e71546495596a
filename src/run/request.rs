// src/run/request.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::errors::SchedulerError;
use crate::types::RunMode;

/// Canonical test identifier, e.g. `com.acme.FooTest` or `com.acme.FooTest#adds`.
pub type TestItemId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    Suite,
    Case,
}

/// Where a test item is displayed in source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
}

/// A discovered unit of test code.
///
/// Items are immutable: rediscovery produces new items that replace the old
/// ones wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestItem {
    pub id: TestItemId,
    pub kind: TestKind,
    pub range: Option<SourceRange>,
}

impl TestItem {
    pub fn new(id: impl Into<TestItemId>, kind: TestKind) -> Self {
        Self {
            id: id.into(),
            kind,
            range: None,
        }
    }

    /// Build an item from a bare id. Ids with a `#member` suffix are cases,
    /// everything else is a suite.
    pub fn from_id(id: impl Into<TestItemId>) -> Self {
        let id = id.into();
        let kind = if id.contains('#') {
            TestKind::Case
        } else {
            TestKind::Suite
        };
        Self::new(id, kind)
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// Caller-supplied run/debug parameters. Forwarded to the backend untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchConfiguration {
    pub name: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// One run/debug request. Consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub targets: Vec<TestItem>,
    pub mode: RunMode,
    pub launch: Option<LaunchConfiguration>,
    pub requested_at: SystemTime,
}

impl RunRequest {
    pub fn new(targets: Vec<TestItem>, mode: RunMode) -> Self {
        Self {
            targets,
            mode,
            launch: None,
            requested_at: SystemTime::now(),
        }
    }

    pub fn run(targets: Vec<TestItem>) -> Self {
        Self::new(targets, RunMode::Run)
    }

    pub fn debug(targets: Vec<TestItem>) -> Self {
        Self::new(targets, RunMode::Debug)
    }

    pub fn with_launch(mut self, launch: LaunchConfiguration) -> Self {
        self.launch = Some(launch);
        self
    }

    /// Reject requests that cannot be executed, before any state changes.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.targets.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "a run request needs at least one test item".to_string(),
            ));
        }
        Ok(())
    }

    /// A fresh request with the same targets, mode and launch configuration.
    pub fn replay(&self) -> Self {
        Self {
            targets: self.targets.clone(),
            mode: self.mode,
            launch: self.launch.clone(),
            requested_at: SystemTime::now(),
        }
    }

    pub fn target_ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id.as_str()).collect()
    }

    /// Same targets, mode and launch configuration; arrival time ignored.
    pub fn same_work_as(&self, other: &RunRequest) -> bool {
        self.targets == other.targets && self.mode == other.mode && self.launch == other.launch
    }
}

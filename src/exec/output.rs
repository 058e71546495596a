// src/exec/output.rs

//! Default runner output protocol.
//!
//! Runners report results on stdout, one per line:
//!
//! ```text
//! @@testrelay passed com.acme.FooTest#adds
//! @@testrelay failed com.acme.FooTest#subtracts expected 1 but was 2
//! @@testrelay finished
//! ```
//!
//! Every other line is ordinary runner output.

use anyhow::{Context, Result};
use regex::Regex;

use crate::exec::backend::BackendEvent;
use crate::run::{ResultUpdate, TestStatus};

pub const PROTOCOL_PREFIX: &str = "@@testrelay";

#[derive(Debug, Clone)]
pub struct ResultLineParser {
    result: Regex,
    finished: Regex,
}

impl ResultLineParser {
    pub fn new() -> Result<Self> {
        let result = Regex::new(
            r"^@@testrelay\s+(running|passed|failed|skipped)\s+(\S+)(?:\s+(.*\S))?\s*$",
        )
        .context("compiling result line pattern")?;
        let finished =
            Regex::new(r"^@@testrelay\s+finished\s*$").context("compiling finished pattern")?;
        Ok(Self { result, finished })
    }

    pub fn parse_line(&self, line: &str) -> Option<BackendEvent> {
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.starts_with(PROTOCOL_PREFIX) {
            return None;
        }
        if self.finished.is_match(line) {
            return Some(BackendEvent::Finished);
        }

        let caps = self.result.captures(line)?;
        let status = match &caps[1] {
            "running" => TestStatus::Running,
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        };
        let mut update = ResultUpdate::new(&caps[2], status);
        if let Some(message) = caps.get(3) {
            update = update.with_message(message.as_str());
        }
        Some(BackendEvent::Result(update))
    }
}

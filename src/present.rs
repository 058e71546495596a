// src/present.rs

//! Outbound presentation collaborators.
//!
//! The scheduler core does not render anything. It tells a [`Presenter`]
//! when views need refreshing and hands result sets to a [`ReportOpener`].
//! The defaults here log refreshes and print a plain-text report.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::run::{ResultUpdate, TestItemId, TestStatus};

/// What a refresh signal covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    Item(TestItemId),
    File(PathBuf),
}

pub trait Presenter: Send + Sync {
    fn refresh(&self, scope: RefreshScope);
}

/// Presenter for headless use: refresh signals only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn refresh(&self, scope: RefreshScope) {
        debug!(?scope, "refresh");
    }
}

pub trait ReportOpener: Send + Sync {
    fn open(&self, results: &[ResultUpdate]);
}

/// Prints the report to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextReport;

impl ReportOpener for TextReport {
    fn open(&self, results: &[ResultUpdate]) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(render_report(results).as_bytes()) {
            warn!(error = %e, "failed to write report");
        }
    }
}

/// Render results as one line per test followed by a tally.
pub fn render_report(results: &[ResultUpdate]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        out.push_str("no results\n");
        return out;
    }

    let (mut passed, mut failed, mut skipped, mut running) = (0, 0, 0, 0);
    for result in results {
        match result.status {
            TestStatus::Passed => passed += 1,
            TestStatus::Failed => failed += 1,
            TestStatus::Skipped => skipped += 1,
            TestStatus::Running => running += 1,
        }
        let _ = write!(out, "{:<8} {}", result.status.to_string().to_uppercase(), result.item);
        if let Some(message) = &result.message {
            let _ = write!(out, " - {message}");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} tests: {passed} passed, {failed} failed, {skipped} skipped, {running} running",
        results.len()
    );
    out
}
